//! Slack `users.json` directory and author display-name resolution.

use std::{collections::HashMap, fmt, path::Path, str::FromStr};

use serde::Deserialize;

use crate::{domain::SourceUserId, errors::Error, Result};

/// One identity record from the export's user list.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExportUser {
    pub id: SourceUserId,
    pub display_name: String,
    pub real_name: String,
    pub username: String,
    pub deleted: bool,
    pub is_bot: bool,
}

impl ExportUser {
    fn field(&self, field: DisplayField) -> &str {
        match field {
            DisplayField::DisplayName => &self.display_name,
            DisplayField::Username => &self.username,
            DisplayField::RealName => &self.real_name,
        }
    }
}

/// A single name field that can represent an author.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DisplayField {
    DisplayName,
    Username,
    RealName,
}

impl DisplayField {
    fn long_name(self) -> &'static str {
        match self {
            DisplayField::DisplayName => "DisplayName",
            DisplayField::Username => "User",
            DisplayField::RealName => "RealName",
        }
    }

    fn short_name(self) -> &'static str {
        match self {
            DisplayField::DisplayName => "D",
            DisplayField::Username => "U",
            DisplayField::RealName => "R",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "displayname" | "display_name" | "display" | "d" => Some(DisplayField::DisplayName),
            "user" | "username" | "u" => Some(DisplayField::Username),
            "realname" | "real_name" | "real" | "r" => Some(DisplayField::RealName),
            _ => None,
        }
    }
}

/// Precedence order of the three name fields used to render an author.
///
/// The UI cycles through the six orderings; the active one is passed
/// explicitly into every resolution call.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct DisplayPolicy {
    order: [DisplayField; 3],
}

impl DisplayPolicy {
    /// All six orderings, in cycling order.
    pub const ALL: [DisplayPolicy; 6] = [
        DisplayPolicy {
            order: [DisplayField::DisplayName, DisplayField::Username, DisplayField::RealName],
        },
        DisplayPolicy {
            order: [DisplayField::DisplayName, DisplayField::RealName, DisplayField::Username],
        },
        DisplayPolicy {
            order: [DisplayField::Username, DisplayField::DisplayName, DisplayField::RealName],
        },
        DisplayPolicy {
            order: [DisplayField::Username, DisplayField::RealName, DisplayField::DisplayName],
        },
        DisplayPolicy {
            order: [DisplayField::RealName, DisplayField::DisplayName, DisplayField::Username],
        },
        DisplayPolicy {
            order: [DisplayField::RealName, DisplayField::Username, DisplayField::DisplayName],
        },
    ];

    /// Build a policy from an explicit order. Returns `None` unless every field appears once.
    pub fn new(order: [DisplayField; 3]) -> Option<Self> {
        let distinct = order[0] != order[1] && order[1] != order[2] && order[0] != order[2];
        distinct.then_some(Self { order })
    }

    pub fn order(&self) -> [DisplayField; 3] {
        self.order
    }

    pub fn index(&self) -> usize {
        Self::ALL.iter().position(|p| p == self).unwrap_or(0)
    }

    /// The next ordering in the cycle (wraps after the sixth).
    #[must_use]
    pub fn next(self) -> Self {
        Self::ALL[(self.index() + 1) % Self::ALL.len()]
    }

    /// `D > U > R` style label.
    pub fn shorthand(&self) -> String {
        self.order
            .iter()
            .map(|f| f.short_name())
            .collect::<Vec<_>>()
            .join(" > ")
    }
}

impl Default for DisplayPolicy {
    fn default() -> Self {
        Self::ALL[0]
    }
}

impl fmt::Display for DisplayPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<_> = self.order.iter().map(|x| x.long_name()).collect();
        f.write_str(&names.join(" > "))
    }
}

impl FromStr for DisplayPolicy {
    type Err = Error;

    /// Accepts `DisplayName_User_RealName`, `DisplayName > User > RealName` and `D>U>R`.
    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<_> = s
            .split(['_', '>', ','])
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .collect();
        let fields: Option<Vec<_>> = parts.iter().map(|p| DisplayField::parse(p)).collect();
        match fields.as_deref() {
            Some(&[a, b, c]) => DisplayPolicy::new([a, b, c]),
            _ => None,
        }
        .ok_or_else(|| Error::Config(format!("invalid user format: {s}")))
    }
}

#[derive(Debug, Deserialize)]
struct RawUser {
    id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    real_name: Option<String>,
    #[serde(default)]
    deleted: bool,
    #[serde(default)]
    is_bot: bool,
    #[serde(default)]
    profile: Option<RawProfile>,
}

#[derive(Debug, Default, Deserialize)]
struct RawProfile {
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    real_name: Option<String>,
}

impl From<RawUser> for ExportUser {
    fn from(raw: RawUser) -> Self {
        let profile = raw.profile.unwrap_or_default();
        let real_name = raw
            .real_name
            .filter(|s| !s.trim().is_empty())
            .or(profile.real_name)
            .unwrap_or_default();
        Self {
            id: SourceUserId(raw.id),
            display_name: profile.display_name.unwrap_or_default(),
            real_name,
            username: raw.name.unwrap_or_default(),
            deleted: raw.deleted,
            is_bot: raw.is_bot,
        }
    }
}

/// Lookup of export users keyed by source-platform id.
///
/// Read-only for the duration of a run once deconstruction begins.
#[derive(Clone, Debug, Default)]
pub struct UserDirectory {
    users: HashMap<SourceUserId, ExportUser>,
}

impl UserDirectory {
    pub fn new(users: impl IntoIterator<Item = ExportUser>) -> Self {
        Self {
            users: users.into_iter().map(|u| (u.id.clone(), u)).collect(),
        }
    }

    /// Load `users.json`. A missing file yields an empty directory.
    pub async fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let contents = match tokio::fs::read_to_string(path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(Error::Io(e)),
        };
        Self::from_json(&contents)
            .map_err(|e| Error::parse(Some(path.to_path_buf()), e.to_string()))
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let raw: Vec<RawUser> = serde_json::from_str(json)?;
        Ok(Self::new(raw.into_iter().map(ExportUser::from)))
    }

    pub fn get(&self, id: &str) -> Option<&ExportUser> {
        self.users.get(&SourceUserId(id.to_string()))
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    /// First non-empty field in policy order; unknown ids and all-empty records yield the raw id.
    pub fn resolve_display(&self, id: &str, policy: DisplayPolicy) -> String {
        self.try_resolve(id, policy)
            .unwrap_or_else(|| id.to_string())
    }

    /// Like [`resolve_display`](Self::resolve_display) but `None` instead of the id fallback.
    pub fn try_resolve(&self, id: &str, policy: DisplayPolicy) -> Option<String> {
        let user = self.get(id)?;
        policy
            .order()
            .into_iter()
            .map(|f| user.field(f).trim())
            .find(|v| !v.is_empty())
            .map(str::to_string)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::DisplayField::{DisplayName as D, RealName as R, Username as U};

    fn user(id: &str, display: &str, username: &str, real: &str) -> ExportUser {
        ExportUser {
            id: SourceUserId(id.to_string()),
            display_name: display.to_string(),
            real_name: real.to_string(),
            username: username.to_string(),
            deleted: false,
            is_bot: false,
        }
    }

    #[test]
    fn resolves_each_of_the_six_orderings() {
        let dir = UserDirectory::new([user("U1", "Ally", "alice", "Alice Smith")]);
        let got: Vec<_> = DisplayPolicy::ALL
            .iter()
            .map(|p| dir.resolve_display("U1", *p))
            .collect();
        assert_eq!(
            got,
            vec!["Ally", "Ally", "alice", "alice", "Alice Smith", "Alice Smith"]
        );
    }

    #[test]
    fn skips_empty_fields_in_policy_order() {
        let dir = UserDirectory::new([user("U1", "  ", "bob", "Bob Jones")]);
        assert_eq!(dir.resolve_display("U1", DisplayPolicy::default()), "bob");
        let real_first = "R>D>U".parse::<DisplayPolicy>().unwrap();
        assert_eq!(dir.resolve_display("U1", real_first), "Bob Jones");
    }

    #[test]
    fn falls_back_to_raw_id() {
        let dir = UserDirectory::new([user("U1", "", "", "")]);
        assert_eq!(dir.resolve_display("U1", DisplayPolicy::default()), "U1");
        assert_eq!(dir.resolve_display("U404", DisplayPolicy::default()), "U404");
        assert!(dir.try_resolve("U404", DisplayPolicy::default()).is_none());
    }

    #[test]
    fn resolution_is_deterministic() {
        let dir = UserDirectory::new([user("U1", "Ally", "alice", "Alice Smith")]);
        let p = DisplayPolicy::ALL[3];
        assert_eq!(dir.resolve_display("U1", p), dir.resolve_display("U1", p));
    }

    #[test]
    fn policy_cycles_through_six_states() {
        let mut p = DisplayPolicy::default();
        let mut seen = vec![p];
        for _ in 0..5 {
            p = p.next();
            seen.push(p);
        }
        assert_eq!(seen, DisplayPolicy::ALL.to_vec());
        assert_eq!(p.next(), DisplayPolicy::default());
    }

    #[test]
    fn policy_parses_long_and_short_forms() {
        let long: DisplayPolicy = "User_RealName_DisplayName".parse().unwrap();
        assert_eq!(long.order(), [U, R, D]);
        let short: DisplayPolicy = "u > r > d".parse().unwrap();
        assert_eq!(long, short);
        assert_eq!(long.to_string(), "User > RealName > DisplayName");
        assert_eq!(long.shorthand(), "U > R > D");

        assert!("D>D>U".parse::<DisplayPolicy>().is_err());
        assert!("D>U".parse::<DisplayPolicy>().is_err());
        assert!("nickname".parse::<DisplayPolicy>().is_err());
    }

    #[test]
    fn parses_slack_users_json() {
        let json = r#"[
            {"id":"U1","name":"alice","real_name":"Alice Smith",
             "profile":{"display_name":"Ally","real_name":"Alice Smith"}},
            {"id":"U2","name":"deploybot","is_bot":true,"deleted":true,
             "profile":{"real_name":"Deploy Bot"}},
            {"id":"U3"}
        ]"#;
        let dir = UserDirectory::from_json(json).unwrap();
        assert_eq!(dir.len(), 3);

        let bot = dir.get("U2").unwrap();
        assert!(bot.is_bot && bot.deleted);
        assert_eq!(bot.real_name, "Deploy Bot");
        assert_eq!(dir.resolve_display("U2", DisplayPolicy::default()), "deploybot");
        assert_eq!(dir.resolve_display("U3", DisplayPolicy::default()), "U3");
    }

    #[test]
    fn malformed_json_is_an_error() {
        assert!(UserDirectory::from_json("{not json").is_err());
        assert!(UserDirectory::from_json(r#"{"id":"U1"}"#).is_err());
    }

    #[tokio::test]
    async fn missing_file_is_empty_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = UserDirectory::load(Some(&tmp.path().join("users.json")))
            .await
            .unwrap();
        assert!(dir.is_empty());
        assert!(UserDirectory::load(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn malformed_file_reports_path() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("users.json");
        std::fs::write(&path, "[{").unwrap();
        let err = UserDirectory::load(Some(&path)).await.unwrap_err();
        assert!(matches!(err, Error::Parse { .. }));
        assert!(err.to_string().contains("users.json"));
    }
}
