use std::collections::{BTreeSet, HashSet};
use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Deserializer};

use super::domain::{DepartmentId, GroupId, MemberId};
use super::recipients::{DirectoryError, Member, MemberDirectory};

#[derive(Debug, thiserror::Error)]
pub enum RosterError {
    #[error("failed to read member roster: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid member roster CSV: {0}")]
    Csv(#[from] csv::Error),
    #[error("member id '{0}' appears more than once in the roster")]
    DuplicateMember(String),
}

/// Member directory loaded from a CSV export of the membership records.
///
/// Expected headers: `Member ID, First Name, Last Name, Phone, Department, Status, Groups`.
/// `Groups` is a `;`-separated list; `Status` other than `inactive` counts as active.
#[derive(Debug, Clone, Default)]
pub struct MemberRoster {
    members: Vec<Member>,
    departments: BTreeSet<DepartmentId>,
    groups: BTreeSet<GroupId>,
}

impl MemberRoster {
    pub fn new(members: Vec<Member>) -> Self {
        let departments = members
            .iter()
            .filter_map(|member| member.department.clone())
            .collect();
        let groups = members
            .iter()
            .flat_map(|member| member.groups.iter().cloned())
            .collect();

        Self {
            members,
            departments,
            groups,
        }
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, RosterError> {
        let file = std::fs::File::open(path)?;
        Self::from_reader(file)
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self, RosterError> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(reader);
        let mut seen = HashSet::new();
        let mut members = Vec::new();

        for row in csv_reader.deserialize::<RosterRow>() {
            let row = row?;
            if !seen.insert(row.member_id.clone()) {
                return Err(RosterError::DuplicateMember(row.member_id));
            }
            members.push(row.into_member());
        }

        Ok(Self::new(members))
    }

    pub fn members(&self) -> &[Member] {
        &self.members
    }

    pub fn departments(&self) -> impl Iterator<Item = &DepartmentId> {
        self.departments.iter()
    }

    pub fn groups(&self) -> impl Iterator<Item = &GroupId> {
        self.groups.iter()
    }
}

impl MemberDirectory for MemberRoster {
    fn active_members(&self) -> Result<Vec<Member>, DirectoryError> {
        Ok(self
            .members
            .iter()
            .filter(|member| member.active)
            .cloned()
            .collect())
    }

    fn department_members(
        &self,
        department: &DepartmentId,
    ) -> Result<Option<Vec<Member>>, DirectoryError> {
        if !self.departments.contains(department) {
            return Ok(None);
        }
        Ok(Some(
            self.members
                .iter()
                .filter(|member| member.department.as_ref() == Some(department))
                .cloned()
                .collect(),
        ))
    }

    fn group_members(&self, group: &GroupId) -> Result<Option<Vec<Member>>, DirectoryError> {
        if !self.groups.contains(group) {
            return Ok(None);
        }
        Ok(Some(
            self.members
                .iter()
                .filter(|member| member.groups.contains(group))
                .cloned()
                .collect(),
        ))
    }

    fn member(&self, id: &MemberId) -> Result<Option<Member>, DirectoryError> {
        Ok(self.members.iter().find(|member| &member.id == id).cloned())
    }
}

#[derive(Debug, Deserialize)]
struct RosterRow {
    #[serde(rename = "Member ID")]
    member_id: String,
    #[serde(rename = "First Name", default)]
    first_name: String,
    #[serde(rename = "Last Name", default)]
    last_name: String,
    #[serde(rename = "Phone", default)]
    phone: String,
    #[serde(
        rename = "Department",
        default,
        deserialize_with = "empty_string_as_none"
    )]
    department: Option<String>,
    #[serde(rename = "Status", default, deserialize_with = "empty_string_as_none")]
    status: Option<String>,
    #[serde(rename = "Groups", default)]
    groups: String,
}

impl RosterRow {
    fn into_member(self) -> Member {
        let active = !matches!(
            self.status.as_deref().map(str::to_ascii_lowercase).as_deref(),
            Some("inactive") | Some("deceased") | Some("transferred")
        );
        let groups = self
            .groups
            .split(';')
            .map(str::trim)
            .filter(|group| !group.is_empty())
            .map(|group| GroupId(group.to_string()))
            .collect();

        Member {
            id: MemberId(self.member_id),
            first_name: self.first_name,
            last_name: self.last_name,
            phone: self.phone,
            active,
            department: self.department.map(DepartmentId),
            groups,
        }
    }
}

fn empty_string_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let opt = Option::<String>::deserialize(deserializer)?;
    Ok(opt.filter(|value| !value.trim().is_empty()))
}
