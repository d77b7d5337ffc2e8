use serde::{Deserialize, Serialize};
use tracing::debug;

/// Display preferences kept only in the `user_preferences` cookie.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Preferences {
    pub theme: String,
    pub notifications: bool,
    pub email_updates: bool,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            theme: "light".to_string(),
            notifications: true,
            email_updates: true,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreferencesUpdate {
    pub theme: Option<String>,
    pub notifications: Option<bool>,
    pub email_updates: Option<bool>,
}

impl Preferences {
    /// Unreadable cookies fall back to the defaults.
    pub fn from_cookie(value: Option<&str>) -> Self {
        value
            .and_then(|raw| match serde_json::from_str(raw) {
                Ok(preferences) => Some(preferences),
                Err(e) => {
                    debug!(error = %e, "Ignoring malformed preferences cookie");
                    None
                }
            })
            .unwrap_or_default()
    }

    /// Missing fields take their default; only an explicit `false` turns a flag off.
    pub fn from_update(update: PreferencesUpdate) -> Self {
        let defaults = Self::default();

        Self {
            theme: update
                .theme
                .filter(|theme| !theme.trim().is_empty())
                .unwrap_or(defaults.theme),
            notifications: update.notifications.unwrap_or(defaults.notifications),
            email_updates: update.email_updates.unwrap_or(defaults.email_updates),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_cookie() {
        assert_eq!(Preferences::from_cookie(None), Preferences::default());
        assert_eq!(Preferences::from_cookie(Some("{not json")), Preferences::default());

        let stored = Preferences::from_cookie(Some(
            r#"{"theme":"dark","notifications":false,"emailUpdates":true}"#,
        ));
        assert_eq!(stored.theme, "dark");
        assert!(!stored.notifications);
    }

    #[test]
    fn test_from_update_fills_defaults() {
        let preferences = Preferences::from_update(PreferencesUpdate {
            theme: None,
            notifications: Some(false),
            email_updates: None,
        });

        assert_eq!(preferences.theme, "light");
        assert!(!preferences.notifications);
        assert!(preferences.email_updates);

        let json = serde_json::to_value(&preferences).unwrap();
        assert_eq!(json["emailUpdates"], true);
    }
}
