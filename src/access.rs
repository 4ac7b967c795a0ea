use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Admin,
    Moderator,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    ManageSettings,
    ManageStudents,
    RecordGrades,
    ManageSchedules,
    ManageAttendance,
}

impl Capability {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ManageSettings => "manageSettings",
            Self::ManageStudents => "manageStudents",
            Self::RecordGrades => "recordGrades",
            Self::ManageSchedules => "manageSchedules",
            Self::ManageAttendance => "manageAttendance",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const ADMIN_CAPABILITIES: &[Capability] = &[
    Capability::ManageSettings,
    Capability::ManageStudents,
    Capability::RecordGrades,
    Capability::ManageSchedules,
    Capability::ManageAttendance,
];

const MODERATOR_CAPABILITIES: &[Capability] =
    &[Capability::RecordGrades, Capability::ManageAttendance];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AccessError {
    #[error("a role is required for {0}")]
    MissingRole(Capability),
    #[error("unknown role: {0}")]
    UnknownRole(String),
    #[error("role {role} lacks {capability}")]
    Denied { role: String, capability: Capability },
}

impl Role {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "admin" => Some(Self::Admin),
            "moderator" => Some(Self::Moderator),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Moderator => "moderator",
        }
    }

    pub fn capabilities(self) -> &'static [Capability] {
        match self {
            Self::Admin => ADMIN_CAPABILITIES,
            Self::Moderator => MODERATOR_CAPABILITIES,
        }
    }

    pub fn allows(self, capability: Capability) -> bool {
        self.capabilities().contains(&capability)
    }
}

/// Resolve the caller's role name and check it grants `capability`.
pub fn authorize(role: Option<&str>, capability: Capability) -> Result<Role, AccessError> {
    let Some(raw) = role else {
        return Err(AccessError::MissingRole(capability));
    };
    let Some(role) = Role::parse(raw) else {
        return Err(AccessError::UnknownRole(raw.to_string()));
    };
    if !role.allows(capability) {
        return Err(AccessError::Denied {
            role: role.as_str().to_string(),
            capability,
        });
    }
    Ok(role)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admin_holds_every_capability() {
        for cap in ADMIN_CAPABILITIES {
            assert!(Role::Admin.allows(*cap));
        }
    }

    #[test]
    fn moderator_is_limited_to_records() {
        assert!(Role::Moderator.allows(Capability::RecordGrades));
        assert!(Role::Moderator.allows(Capability::ManageAttendance));
        assert!(!Role::Moderator.allows(Capability::ManageSchedules));
        assert!(!Role::Moderator.allows(Capability::ManageSettings));
        assert!(!Role::Moderator.allows(Capability::ManageStudents));
    }

    #[test]
    fn authorize_reports_why_it_refused() {
        assert_eq!(
            authorize(None, Capability::RecordGrades),
            Err(AccessError::MissingRole(Capability::RecordGrades))
        );
        assert_eq!(
            authorize(Some("janitor"), Capability::RecordGrades),
            Err(AccessError::UnknownRole("janitor".to_string()))
        );
        assert!(matches!(
            authorize(Some("moderator"), Capability::ManageSchedules),
            Err(AccessError::Denied { .. })
        ));
        assert_eq!(authorize(Some("Admin"), Capability::ManageSchedules), Ok(Role::Admin));
    }
}
