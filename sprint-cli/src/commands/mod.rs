//! CLI command implementations.

pub mod init;
pub mod plan;
pub mod simulate;

/// `m:ss` for a number of seconds.
pub(crate) fn clock_text(secs: u64) -> String {
    format!("{}:{:02}", secs / 60, secs % 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clock_text_pads_seconds() {
        assert_eq!(clock_text(0), "0:00");
        assert_eq!(clock_text(65), "1:05");
        assert_eq!(clock_text(600), "10:00");
    }
}
