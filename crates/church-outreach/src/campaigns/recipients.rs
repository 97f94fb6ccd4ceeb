use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::domain::{DepartmentId, GroupId, MemberId, Recipient, RecipientType};
use super::phone;

/// Directory entry as exposed by the member records store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub id: MemberId,
    pub first_name: String,
    pub last_name: String,
    pub phone: String,
    pub active: bool,
    pub department: Option<DepartmentId>,
    #[serde(default)]
    pub groups: Vec<GroupId>,
}

impl Member {
    pub fn display_name(&self) -> String {
        format!("{} {}", self.first_name.trim(), self.last_name.trim())
            .trim()
            .to_string()
    }
}

/// Read-only view of the member records the resolver targets.
///
/// Department and group lookups return `Ok(None)` when the id does not exist so the resolver can
/// tell an unknown target apart from an empty one.
pub trait MemberDirectory: Send + Sync {
    fn active_members(&self) -> Result<Vec<Member>, DirectoryError>;
    fn department_members(
        &self,
        department: &DepartmentId,
    ) -> Result<Option<Vec<Member>>, DirectoryError>;
    fn group_members(&self, group: &GroupId) -> Result<Option<Vec<Member>>, DirectoryError>;
    fn member(&self, id: &MemberId) -> Result<Option<Member>, DirectoryError>;
}

#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    #[error("member directory unavailable: {0}")]
    Unavailable(String),
}

/// Ad-hoc recipient typed in by an administrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdHocRecipient {
    pub phone: String,
    #[serde(default)]
    pub name: Option<String>,
}

/// Declarative description of who a campaign reaches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TargetingSpec {
    AllActive,
    Department { department_id: DepartmentId },
    Group { group_id: GroupId },
    Members { member_ids: Vec<MemberId> },
    Custom { recipients: Vec<AdHocRecipient> },
}

impl TargetingSpec {
    pub fn recipient_type(&self) -> RecipientType {
        match self {
            Self::AllActive => RecipientType::AllActive,
            Self::Department { .. } => RecipientType::Department,
            Self::Group { .. } => RecipientType::Group,
            Self::Members { .. } => RecipientType::Members,
            Self::Custom { .. } => RecipientType::Custom,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("invalid target: {0}")]
    InvalidTarget(String),
    #[error(transparent)]
    Directory(#[from] DirectoryError),
}

/// Turns targeting specs into ordered, phone-deduplicated recipient lists.
#[derive(Clone)]
pub struct RecipientResolver {
    directory: Arc<dyn MemberDirectory>,
    default_country_code: String,
}

impl RecipientResolver {
    pub fn new(directory: Arc<dyn MemberDirectory>, default_country_code: impl Into<String>) -> Self {
        Self {
            directory,
            default_country_code: default_country_code.into(),
        }
    }

    pub fn resolve(&self, spec: &TargetingSpec) -> Result<Vec<Recipient>, ResolveError> {
        let candidates: Vec<Recipient> = match spec {
            TargetingSpec::AllActive => self
                .directory
                .active_members()?
                .iter()
                .map(recipient_from_member)
                .collect(),
            TargetingSpec::Department { department_id } => self
                .directory
                .department_members(department_id)?
                .ok_or_else(|| {
                    ResolveError::InvalidTarget(format!("unknown department '{}'", department_id.0))
                })?
                .iter()
                .filter(|member| member.active)
                .map(recipient_from_member)
                .collect(),
            TargetingSpec::Group { group_id } => self
                .directory
                .group_members(group_id)?
                .ok_or_else(|| {
                    ResolveError::InvalidTarget(format!("unknown group '{}'", group_id.0))
                })?
                .iter()
                .filter(|member| member.active)
                .map(recipient_from_member)
                .collect(),
            TargetingSpec::Members { member_ids } => {
                let mut recipients = Vec::with_capacity(member_ids.len());
                for id in member_ids {
                    let member = self.directory.member(id)?.ok_or_else(|| {
                        ResolveError::InvalidTarget(format!("unknown member '{}'", id.0))
                    })?;
                    recipients.push(recipient_from_member(&member));
                }
                recipients
            }
            TargetingSpec::Custom { recipients } => {
                recipients.iter().map(recipient_from_ad_hoc).collect()
            }
        };

        let total = candidates.len();
        let resolved = self.deduplicate(candidates);
        debug!(
            recipient_type = ?spec.recipient_type(),
            candidates = total,
            resolved = resolved.len(),
            "resolved campaign recipients"
        );
        Ok(resolved)
    }

    fn deduplicate(&self, candidates: Vec<Recipient>) -> Vec<Recipient> {
        let mut seen = HashSet::new();
        let mut resolved = Vec::with_capacity(candidates.len());

        for mut recipient in candidates {
            let cleaned = phone::clean(&recipient.phone);
            if cleaned.is_empty() {
                continue;
            }
            // unparseable numbers stay in the list so the adapter records them as failed
            recipient.phone =
                phone::normalize(&cleaned, &self.default_country_code).unwrap_or(cleaned);
            if seen.insert(recipient.phone.clone()) {
                resolved.push(recipient);
            }
        }

        resolved
    }
}

fn recipient_from_member(member: &Member) -> Recipient {
    let mut fields = BTreeMap::new();
    if let Some(department) = &member.department {
        fields.insert("department".to_string(), department.0.clone());
    }

    Recipient {
        id: Some(member.id.clone()),
        display_name: member.display_name(),
        first_name: member.first_name.trim().to_string(),
        last_name: member.last_name.trim().to_string(),
        phone: member.phone.clone(),
        fields,
    }
}

fn recipient_from_ad_hoc(entry: &AdHocRecipient) -> Recipient {
    let name = entry
        .name
        .as_deref()
        .map(str::trim)
        .filter(|name| !name.is_empty());
    let (first_name, last_name) = match name {
        Some(name) => match name.split_once(' ') {
            Some((first, rest)) => (first.to_string(), rest.trim().to_string()),
            None => (name.to_string(), String::new()),
        },
        None => (String::new(), String::new()),
    };

    Recipient {
        id: None,
        display_name: name.unwrap_or(entry.phone.trim()).to_string(),
        first_name,
        last_name,
        phone: entry.phone.clone(),
        fields: BTreeMap::new(),
    }
}
