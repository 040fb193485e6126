use std::env;
use std::path::PathBuf;
use std::str::FromStr;

#[derive(Clone, Debug)]
pub struct Config {
    pub bind_addr: String,
    pub port: u16,
    pub log_file: PathBuf,
    pub max_players: usize,
    /// Seeds every room's tie-break randomness when set.
    pub vote_seed: Option<u64>,
    /// Variables that were present but unparsable and fell back to defaults.
    pub invalid_keys: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0".to_string(),
            port: 3000,
            log_file: PathBuf::from("server.log"),
            max_players: 6,
            vote_seed: None,
            invalid_keys: Vec::new(),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(addr) = lookup("BIND_ADDR").filter(|v| !v.trim().is_empty()) {
            config.bind_addr = addr.trim().to_string();
        }
        if let Some(path) = lookup("LOG_FILE").filter(|v| !v.trim().is_empty()) {
            config.log_file = PathBuf::from(path);
        }
        if let Some(port) = parse(&lookup, "PORT", &mut config.invalid_keys) {
            config.port = port;
        }
        if let Some(max) = parse(&lookup, "MAX_PLAYERS", &mut config.invalid_keys) {
            config.max_players = max;
        }
        config.vote_seed = parse(&lookup, "VOTE_SEED", &mut config.invalid_keys);
        config
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind_addr, self.port)
    }
}

fn parse<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    invalid: &mut Vec<String>,
) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            invalid.push(key.to_string());
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect::<HashMap<_, _>>();
        move |key: &str| vars.get(key).cloned()
    }

    #[test]
    fn defaults_when_unset() {
        let config = Config::from_lookup(lookup_from(&[]));
        assert_eq!(config.listen_addr(), "0.0.0.0:3000");
        assert_eq!(config.log_file, PathBuf::from("server.log"));
        assert_eq!(config.max_players, 6);
        assert_eq!(config.vote_seed, None);
        assert!(config.invalid_keys.is_empty());
    }

    #[test]
    fn reads_overrides_and_flags_bad_numbers() {
        let config = Config::from_lookup(lookup_from(&[
            ("BIND_ADDR", "127.0.0.1"),
            ("PORT", "8443"),
            ("LOG_FILE", "/tmp/relay.log"),
            ("MAX_PLAYERS", "many"),
            ("VOTE_SEED", "42"),
        ]));
        assert_eq!(config.listen_addr(), "127.0.0.1:8443");
        assert_eq!(config.log_file, PathBuf::from("/tmp/relay.log"));
        assert_eq!(config.max_players, 6);
        assert_eq!(config.vote_seed, Some(42));
        assert_eq!(config.invalid_keys, vec!["MAX_PLAYERS".to_string()]);
    }
}
