//! Operating profiles and their fixed credential pairs

use serde::{Deserialize, Serialize};

/// Selects which fixed credential pair auto-login uses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Profile {
    #[default]
    Primary,
    Secondary,
}

impl Profile {
    pub fn as_str(&self) -> &'static str {
        match self {
            Profile::Primary => "primary",
            Profile::Secondary => "secondary",
        }
    }
}

impl std::fmt::Display for Profile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Profile {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "primary" => Ok(Profile::Primary),
            "secondary" => Ok(Profile::Secondary),
            _ => Err(format!("Unknown profile: {}", s)),
        }
    }
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

impl Credentials {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
        }
    }
}

// Keeps passwords out of logs
impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileCredentials {
    pub primary: Credentials,
    pub secondary: Credentials,
}

impl ProfileCredentials {
    pub fn new(primary: Credentials, secondary: Credentials) -> Self {
        Self { primary, secondary }
    }

    pub fn for_profile(&self, profile: Profile) -> &Credentials {
        match profile {
            Profile::Primary => &self.primary,
            Profile::Secondary => &self.secondary,
        }
    }
}
