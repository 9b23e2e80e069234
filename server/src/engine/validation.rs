/// Default maximum message content length (characters).
pub const MAX_MESSAGE_LENGTH: usize = 4000;

/// Validate message content. Must contain something other than whitespace and
/// stay within `max_length` characters.
pub fn validate_content(content: &str, max_length: usize) -> Result<(), String> {
    if content.trim().is_empty() {
        return Err("Message cannot be empty".into());
    }
    if content.chars().count() > max_length {
        return Err(format!("Message too long (max {max_length} characters)"));
    }
    Ok(())
}
