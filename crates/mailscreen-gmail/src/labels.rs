//! Gmail system label ids used by the screening pipeline.

/// The inbox label.
pub const INBOX: &str = "INBOX";
/// Unread messages.
pub const UNREAD: &str = "UNREAD";
/// Messages sent by the mailbox owner.
pub const SENT: &str = "SENT";
/// Trashed messages.
pub const TRASH: &str = "TRASH";
/// Messages classified as spam.
pub const SPAM: &str = "SPAM";
/// Gmail's importance marker.
pub const IMPORTANT: &str = "IMPORTANT";
