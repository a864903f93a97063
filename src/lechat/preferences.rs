use serde::{Deserialize, Serialize};

/// Reader preferences that change how the assistant behaves.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Preferences {
    /// Navigate as soon as a page is requested instead of asking first.
    pub always_navigate: bool,
}

impl Preferences {
    pub fn apply(&mut self, patch: &PreferencePatch) -> bool {
        let before = *self;
        if let Some(always_navigate) = patch.always_navigate {
            self.always_navigate = always_navigate;
        }
        *self != before
    }
}

/// Partial update emitted by a `SET_PREFERENCE:` directive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreferencePatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub always_navigate: Option<bool>,
}

impl PreferencePatch {
    pub fn is_empty(&self) -> bool {
        self.always_navigate.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn patch_serializes_only_set_fields() {
        let patch = PreferencePatch {
            always_navigate: Some(true),
        };
        assert_eq!(
            serde_json::to_string(&patch).unwrap(),
            r#"{"alwaysNavigate":true}"#
        );
        assert_eq!(serde_json::to_string(&PreferencePatch::default()).unwrap(), "{}");
    }

    #[test]
    fn apply_reports_changes() {
        let mut prefs = Preferences::default();
        assert!(prefs.apply(&PreferencePatch {
            always_navigate: Some(true)
        }));
        assert!(!prefs.apply(&PreferencePatch {
            always_navigate: Some(true)
        }));
        assert!(!prefs.apply(&PreferencePatch::default()));
        assert!(prefs.always_navigate);
    }

    #[test]
    fn preferences_tolerate_missing_fields() {
        let prefs: Preferences = serde_json::from_str("{}").unwrap();
        assert!(!prefs.always_navigate);
    }
}
