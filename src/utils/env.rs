pub fn read_env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .and_then(|value| {
            let normalized = value.trim().to_ascii_lowercase();
            if matches!(normalized.as_str(), "1" | "true" | "yes" | "on") {
                Some(true)
            } else if matches!(normalized.as_str(), "0" | "false" | "no" | "off") {
                Some(false)
            } else {
                None
            }
        })
        .unwrap_or(default)
}

pub fn read_env_u64(key: &str, default: u64, min: u64, max: u64) -> u64 {
    let parsed = std::env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
        .unwrap_or(default);
    parsed.clamp(min, max)
}

pub fn read_env_usize(key: &str, default: usize, min: usize, max: usize) -> usize {
    let parsed = std::env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<usize>().ok())
        .unwrap_or(default);
    parsed.clamp(min, max)
}

pub fn read_env_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamps_and_falls_back() {
        std::env::set_var("LAUNCHER_TEST_ENV_USIZE", "9000");
        assert_eq!(read_env_usize("LAUNCHER_TEST_ENV_USIZE", 4, 1, 16), 16);
        std::env::set_var("LAUNCHER_TEST_ENV_USIZE", "not-a-number");
        assert_eq!(read_env_usize("LAUNCHER_TEST_ENV_USIZE", 4, 1, 16), 4);
        std::env::remove_var("LAUNCHER_TEST_ENV_USIZE");
    }

    #[test]
    fn reads_bool_spellings() {
        std::env::set_var("LAUNCHER_TEST_ENV_BOOL", " Off ");
        assert!(!read_env_bool("LAUNCHER_TEST_ENV_BOOL", true));
        std::env::set_var("LAUNCHER_TEST_ENV_BOOL", "yes");
        assert!(read_env_bool("LAUNCHER_TEST_ENV_BOOL", false));
        std::env::set_var("LAUNCHER_TEST_ENV_BOOL", "maybe");
        assert!(read_env_bool("LAUNCHER_TEST_ENV_BOOL", true));
        std::env::remove_var("LAUNCHER_TEST_ENV_BOOL");
    }
}
