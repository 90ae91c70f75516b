use std::{path::PathBuf, str::FromStr, time::Duration};
use tidehunter_data::EngineConfig;

pub const DEFAULT_ALERTS_PATH: &str = "data/alerts.json";

/// Telegram bot credentials & default chat.
#[derive(Clone, Eq, PartialEq)]
pub struct TelegramConfig {
    pub token: String,
    pub chat_id: String,
}

impl std::fmt::Debug for TelegramConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramConfig")
            .field("token", &"<redacted>")
            .field("chat_id", &self.chat_id)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub engine: EngineConfig,
    pub alerts_path: PathBuf,
    pub telegram: Option<TelegramConfig>,
    pub binance_rest_url: Option<String>,
    pub binance_ws_url: Option<String>,
    pub log_json: bool,
}

impl ServerConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build the config from variables provided by `lookup`, falling back to defaults for
    /// anything absent or unparseable.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let secs = |name: &str| {
            lookup(name)
                .and_then(|value| u64::from_str(value.trim()).ok())
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs)
        };
        let non_empty = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        let mut engine = EngineConfig::default();
        if let Some(interval) = secs("TIDEHUNTER_EVALUATE_SECS") {
            engine = engine.with_evaluate_interval(interval);
        }
        if let Some(interval) = secs("TIDEHUNTER_COLLECT_SECS") {
            engine = engine.with_collect_interval(interval);
        }
        if let Some(interval) = secs("TIDEHUNTER_DRAIN_SECS") {
            engine = engine.with_drain_interval(interval);
        }
        if let Some(timeout) = secs("TIDEHUNTER_READ_TIMEOUT_SECS") {
            engine = engine.with_read_timeout(timeout);
        }

        let telegram = non_empty("TELEGRAM_BOT_TOKEN")
            .zip(non_empty("TELEGRAM_CHAT_ID"))
            .map(|(token, chat_id)| TelegramConfig { token, chat_id });

        Self {
            engine,
            alerts_path: non_empty("TIDEHUNTER_ALERTS_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_ALERTS_PATH)),
            telegram,
            binance_rest_url: non_empty("BINANCE_REST_URL"),
            binance_ws_url: non_empty("BINANCE_WS_URL"),
            log_json: lookup("TIDEHUNTER_LOG_FORMAT")
                .is_some_and(|format| format.eq_ignore_ascii_case("json")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars = vars
            .iter()
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect::<HashMap<_, _>>();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_server_config_defaults() {
        let actual = ServerConfig::from_lookup(lookup(&[]));

        assert_eq!(actual.engine, EngineConfig::default());
        assert_eq!(actual.alerts_path, PathBuf::from(DEFAULT_ALERTS_PATH));
        assert_eq!(actual.telegram, None);
        assert!(!actual.log_json);
    }

    #[test]
    fn test_server_config_overrides() {
        struct TestCase {
            vars: Vec<(&'static str, &'static str)>,
            check: fn(&ServerConfig) -> bool,
        }

        let tests = vec![
            TestCase {
                // TC0: evaluate interval override
                vars: vec![("TIDEHUNTER_EVALUATE_SECS", "5")],
                check: |config| config.engine.evaluate_interval == Duration::from_secs(5),
            },
            TestCase {
                // TC1: unparseable & zero intervals fall back to defaults
                vars: vec![
                    ("TIDEHUNTER_COLLECT_SECS", "soon"),
                    ("TIDEHUNTER_DRAIN_SECS", "0"),
                ],
                check: |config| config.engine == EngineConfig::default(),
            },
            TestCase {
                // TC2: read timeout lands in the feed config
                vars: vec![("TIDEHUNTER_READ_TIMEOUT_SECS", "30")],
                check: |config| config.engine.feed.read_timeout == Duration::from_secs(30),
            },
            TestCase {
                // TC3: telegram requires both token & chat id
                vars: vec![("TELEGRAM_BOT_TOKEN", "123:abc")],
                check: |config| config.telegram.is_none(),
            },
            TestCase {
                // TC4: telegram with both token & chat id
                vars: vec![("TELEGRAM_BOT_TOKEN", "123:abc"), ("TELEGRAM_CHAT_ID", "42")],
                check: |config| {
                    config.telegram
                        == Some(TelegramConfig {
                            token: "123:abc".to_string(),
                            chat_id: "42".to_string(),
                        })
                },
            },
            TestCase {
                // TC5: json log format is case-insensitive
                vars: vec![("TIDEHUNTER_LOG_FORMAT", "JSON")],
                check: |config| config.log_json,
            },
            TestCase {
                // TC6: alerts path & exchange urls
                vars: vec![
                    ("TIDEHUNTER_ALERTS_PATH", "/etc/tidehunter/alerts.json"),
                    ("BINANCE_WS_URL", "ws://127.0.0.1:9001/ws"),
                ],
                check: |config| {
                    config.alerts_path == PathBuf::from("/etc/tidehunter/alerts.json")
                        && config.binance_ws_url.as_deref() == Some("ws://127.0.0.1:9001/ws")
                        && config.binance_rest_url.is_none()
                },
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let actual = ServerConfig::from_lookup(lookup(&test.vars));
            assert!((test.check)(&actual), "TC{} failed", index);
        }
    }

    #[test]
    fn test_telegram_config_debug_redacts_token() {
        let config = TelegramConfig {
            token: "123:secret".to_string(),
            chat_id: "42".to_string(),
        };

        assert!(!format!("{config:?}").contains("secret"));
    }
}
