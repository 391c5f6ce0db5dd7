use serde::{Deserialize, Serialize};
use std::fmt;

/// What a session is researching. Built once from caller input and never
/// mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResearchTarget {
    Person {
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        email: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        company: Option<String>,
    },
    Company {
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        email: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
    Person,
    Company,
}

impl TargetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetKind::Person => "person",
            TargetKind::Company => "company",
        }
    }

    /// Schema field that holds the professional-network profile link.
    pub fn profile_field(&self) -> &'static str {
        match self {
            TargetKind::Person => "linkedin_profile",
            TargetKind::Company => "linkedin_url",
        }
    }

    /// Path segment a profile URL must contain to belong to this kind of
    /// entity.
    pub fn profile_path(&self) -> &'static str {
        match self {
            TargetKind::Person => "linkedin.com/in/",
            TargetKind::Company => "linkedin.com/company/",
        }
    }

    /// True when `url` looks like a profile page for this kind.
    pub fn is_profile_url(&self, url: &str) -> bool {
        url.to_lowercase().contains(self.profile_path())
    }
}

impl fmt::Display for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TargetKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "person" => Ok(TargetKind::Person),
            "company" => Ok(TargetKind::Company),
            other => Err(format!("unknown target kind '{}'", other)),
        }
    }
}

impl ResearchTarget {
    pub fn person(name: impl Into<String>) -> Self {
        ResearchTarget::Person { name: name.into(), email: None, company: None }
    }

    pub fn company(name: impl Into<String>) -> Self {
        ResearchTarget::Company { name: name.into(), email: None }
    }

    pub fn with_email(self, email: impl Into<String>) -> Self {
        let email = Some(email.into());
        match self {
            ResearchTarget::Person { name, company, .. } => ResearchTarget::Person { name, email, company },
            ResearchTarget::Company { name, .. } => ResearchTarget::Company { name, email },
        }
    }

    /// Companies have no employer; the value is ignored for them.
    pub fn with_company(self, company: impl Into<String>) -> Self {
        match self {
            ResearchTarget::Person { name, email, .. } => ResearchTarget::Person {
                name,
                email,
                company: Some(company.into()),
            },
            other => other,
        }
    }

    pub fn kind(&self) -> TargetKind {
        match self {
            ResearchTarget::Person { .. } => TargetKind::Person,
            ResearchTarget::Company { .. } => TargetKind::Company,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            ResearchTarget::Person { name, .. } | ResearchTarget::Company { name, .. } => name,
        }
    }

    /// Renders the populated attributes as `NAME: value` lines for prompts.
    pub fn info_lines(&self) -> String {
        let mut lines = Vec::new();
        match self {
            ResearchTarget::Person { name, email, company } => {
                lines.push(format!("NAME: {}", name));
                if let Some(email) = email {
                    lines.push(format!("EMAIL: {}", email));
                }
                if let Some(company) = company {
                    lines.push(format!("COMPANY: {}", company));
                }
            }
            ResearchTarget::Company { name, email } => {
                lines.push(format!("NAME: {}", name));
                if let Some(email) = email {
                    lines.push(format!("EMAIL: {}", email));
                }
            }
        }
        let mut out = lines.join("\n");
        out.push('\n');
        out
    }
}
