//! Input validation and sanitization functions for treefw
//!
//! Ids and interface names end up in file names and in iptables-restore
//! text, so they are restricted to a small, safe character set.

/// Maximum length of a router or subnet id
pub const MAX_ID_LENGTH: usize = 64;

/// Maximum length of a rule comment (xt_comment limit is 256 bytes)
pub const MAX_COMMENT_LENGTH: usize = 64;

/// Sanitizes text for safe use in an iptables `--comment`.
///
/// Removes control characters, quotes, and shell metacharacters.
/// Limits length to [`MAX_COMMENT_LENGTH`] ASCII characters.
///
/// # Examples
///
/// ```
/// use treefw::validators::sanitize_comment;
///
/// assert_eq!(sanitize_comment("flow 3: 1 -> 4"), "flow 3: 1 - 4");
/// assert!(!sanitize_comment("a\"b\nc").contains('"'));
/// ```
pub fn sanitize_comment(input: &str) -> String {
    input
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, ' ' | '-' | '_' | '.' | ':' | '/' | ','))
        .take(MAX_COMMENT_LENGTH)
        .collect()
}

/// Validates a single port number.
///
/// # Errors
///
/// Returns `Err` if port is 0 (reserved).
pub fn validate_port(port: u16) -> Result<u16, String> {
    if port == 0 {
        Err("Port must be between 1 and 65535".to_string())
    } else {
        Ok(port)
    }
}

/// Validates a port range.
///
/// # Errors
///
/// Returns `Err` if:
/// - Either port is 0
/// - Start port is greater than end port
pub fn validate_port_range(start: u16, end: u16) -> Result<(u16, u16), String> {
    validate_port(start)?;
    validate_port(end)?;

    if start > end {
        Err("Start port must be less than or equal to end port".to_string())
    } else {
        Ok((start, end))
    }
}

/// Validates a network interface name.
///
/// Linux kernel interface name rules:
/// - Max 15 characters (IFNAMSIZ - 1)
/// - Alphanumeric, dot, dash, underscore only
/// - Cannot be "." or ".."
///
/// # Errors
///
/// Returns `Err` if interface name violates kernel constraints.
pub fn validate_interface(name: &str) -> Result<String, String> {
    if name.is_empty() {
        return Err("Interface name cannot be empty".to_string());
    }

    if name.len() > 15 {
        return Err("Interface name too long (max 15 characters)".to_string());
    }

    if name == "." || name == ".." {
        return Err("Invalid interface name".to_string());
    }

    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
    {
        return Err("Interface name contains invalid characters".to_string());
    }

    Ok(name.to_string())
}

/// Validates a router or subnet id.
///
/// Router ids become output file names, so the same constraints as
/// file-system-safe names apply:
/// - Alphanumeric, underscores, and hyphens only
/// - 1 to [`MAX_ID_LENGTH`] characters
///
/// # Errors
///
/// Returns `Err` with a reason if the id is unusable.
pub fn validate_node_id(id: &str) -> Result<(), String> {
    if id.is_empty() {
        return Err("Id cannot be empty".to_string());
    }

    if id.len() > MAX_ID_LENGTH {
        return Err(format!("Id too long (max {MAX_ID_LENGTH} chars)"));
    }

    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err("Id contains invalid characters (use only a-z, 0-9, _, -)".to_string());
    }

    Ok(())
}

/// Validates a test case id (the stem of `<id>.json`).
///
/// # Errors
///
/// Returns `Err` unless the id is a non-empty run of ASCII digits.
pub fn validate_testcase_id(id: &str) -> Result<(), String> {
    if id.is_empty() || id.len() > 20 || !id.chars().all(|c| c.is_ascii_digit()) {
        return Err(format!("Invalid test case id {id:?} (expected digits only)"));
    }
    Ok(())
}

/// Checks if a port is well-known and returns informational message.
///
/// This is informational only; used by `treefw show` summaries.
pub fn check_well_known_port(port: u16) -> Option<&'static str> {
    match port {
        22 => Some("SSH"),
        80 => Some("HTTP"),
        443 => Some("HTTPS"),
        53 => Some("DNS"),
        25 => Some("SMTP"),
        21 => Some("FTP"),
        3389 => Some("RDP"),
        _ => None,
    }
}
