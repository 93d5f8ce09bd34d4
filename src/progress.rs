//! Progress reporting for long-running batch and training work.

use std::time::Duration;

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle, style::TemplateError};

/// Creates a styled progress bar with elapsed time, a fixed-width message label, and position/total counters.
///
/// When `show` is false the bar is still returned, so callers can tick it
/// unconditionally, but it never renders.
///
/// # Arguments
///
/// * `size` - The total number of steps the progress bar represents.
/// * `msg` - The message label displayed alongside the progress bar.
/// * `show` - Whether the bar is drawn.
///
/// # Errors
///
/// Returns a [`TemplateError`] if the progress bar style template is invalid.
pub(crate) fn progress_bar(
    size: u64,
    msg: impl Into<String>,
    show: bool,
) -> Result<ProgressBar, TemplateError> {
    let pb = ProgressBar::new(size);
    if !show {
        // force dummy progress bar to not render
        pb.set_draw_target(ProgressDrawTarget::hidden());
        return Ok(pb);
    }

    let style =
        ProgressStyle::default_bar().template("[{elapsed_precise}] {msg:<30!} {wide_bar} {pos}/{len}")?;

    pb.set_style(style);
    pb.set_message(msg.into());
    pb.enable_steady_tick(Duration::from_secs(1));

    Ok(pb)
}
