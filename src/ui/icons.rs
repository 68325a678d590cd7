//! Status icons shared by the preview and summary renderers.

use console::Emoji;

pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "[OK]");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "[ERR]");
pub static SKIP: Emoji<'_, '_> = Emoji("⏭️  ", "[SKIP]");
pub static PAUSE: Emoji<'_, '_> = Emoji("⏸️  ", "[PAUSE]");
pub static LOCK: Emoji<'_, '_> = Emoji("🔒 ", "[LOCK]");
pub static STOP: Emoji<'_, '_> = Emoji("🛑 ", "[STOP]");
pub static PENDING: Emoji<'_, '_> = Emoji("⏳ ", "[..]");
pub static QUESTION: Emoji<'_, '_> = Emoji("❓ ", "[?]");
