//! Shared status icons with plain-text fallbacks.

use chatops_common::JobStatus;
use console::Emoji;

pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "[OK]");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "[ERR]");
pub static STOP: Emoji<'_, '_> = Emoji("⏹️  ", "[STOP]");
pub static RUNNING: Emoji<'_, '_> = Emoji("▶️  ", "[>]");
pub static CLOCK: Emoji<'_, '_> = Emoji("⏱️  ", "[T]");
pub static QUESTION: Emoji<'_, '_> = Emoji("❓ ", "[?]");
pub static SPARKLE: Emoji<'_, '_> = Emoji("✨ ", "*");

pub fn status_icon(status: JobStatus) -> &'static Emoji<'static, 'static> {
    match status {
        JobStatus::Queued => &CLOCK,
        JobStatus::Running => &RUNNING,
        JobStatus::Completed => &CHECK,
        JobStatus::Failed => &CROSS,
        JobStatus::Cancelled => &STOP,
    }
}
