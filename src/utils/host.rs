// sqlexport/src/utils/host.rs

/// Port SQL Server listens on unless told otherwise.
pub const DEFAULT_SQLSERVER_PORT: &str = "1433";
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Splits a SQL Server style host specification into `(host, port)`.
///
/// Accepts `host:port`, `host,port` (optionally with a space after the comma)
/// and a bare `host`. A missing port falls back to 1433 and an empty
/// specification to `127.0.0.1:1433`.
pub fn parse_host_port(info: &str) -> (String, String) {
    if let Some((host, port)) = info.split_once(':') {
        (host.to_string(), port.trim().to_string())
    } else if let Some((host, port)) = info.split_once(',') {
        (host.to_string(), port.trim().to_string())
    } else if !info.is_empty() {
        (info.to_string(), DEFAULT_SQLSERVER_PORT.to_string())
    } else {
        (DEFAULT_HOST.to_string(), DEFAULT_SQLSERVER_PORT.to_string())
    }
}

/// Returns true when `info` carries its own port.
pub fn has_explicit_port(info: &str) -> bool {
    info.contains(':') || info.contains(',')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair(host: &str, port: &str) -> (String, String) {
        (host.to_string(), port.to_string())
    }

    #[test]
    fn test_colon_separated() {
        assert_eq!(parse_host_port("db.example.com:1434"), pair("db.example.com", "1434"));
    }

    #[test]
    fn test_comma_separated() {
        assert_eq!(parse_host_port("10.0.0.5,1500"), pair("10.0.0.5", "1500"));
        assert_eq!(parse_host_port("10.0.0.5, 1500"), pair("10.0.0.5", "1500"));
    }

    #[test]
    fn test_bare_host_uses_default_port() {
        assert_eq!(parse_host_port("myhost"), pair("myhost", "1433"));
    }

    #[test]
    fn test_empty_uses_loopback() {
        assert_eq!(parse_host_port(""), pair("127.0.0.1", "1433"));
    }

    #[test]
    fn test_explicit_port_detection() {
        assert!(has_explicit_port("db:1433"));
        assert!(has_explicit_port("db, 1433"));
        assert!(!has_explicit_port("db"));
    }
}
