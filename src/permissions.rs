use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{AuthError, ValidationError};
use crate::models::{Role, User};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    View,
    Create,
    Sanction,
    AccessSettings,
    Admin,
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Permission::View => "view",
            Permission::Create => "create",
            Permission::Sanction => "sanction",
            Permission::AccessSettings => "access_settings",
            Permission::Admin => "admin",
        };
        f.write_str(name)
    }
}

impl FromStr for Permission {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "view" => Ok(Permission::View),
            "create" => Ok(Permission::Create),
            "sanction" => Ok(Permission::Sanction),
            "access_settings" | "settings" => Ok(Permission::AccessSettings),
            "admin" => Ok(Permission::Admin),
            _ => Err(ValidationError::UnknownValue {
                field: "permission",
                value: value.to_string(),
            }),
        }
    }
}

/// Effective flags for one user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PermissionSet {
    pub view: bool,
    pub create: bool,
    pub sanction: bool,
    pub access_settings: bool,
    pub admin: bool,
}

impl PermissionSet {
    pub fn allows(&self, permission: Permission) -> bool {
        match permission {
            Permission::View => self.view,
            Permission::Create => self.create,
            Permission::Sanction => self.sanction,
            Permission::AccessSettings => self.access_settings,
            Permission::Admin => self.admin,
        }
    }
}

/// Per-user manual choices. `None` keeps the role default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PermissionOverrides {
    pub view: Option<bool>,
    pub create: Option<bool>,
    pub sanction: Option<bool>,
    pub access_settings: Option<bool>,
    pub admin: Option<bool>,
}

impl PermissionOverrides {
    pub fn apply(&self, defaults: PermissionSet) -> PermissionSet {
        PermissionSet {
            view: self.view.unwrap_or(defaults.view),
            create: self.create.unwrap_or(defaults.create),
            sanction: self.sanction.unwrap_or(defaults.sanction),
            access_settings: self.access_settings.unwrap_or(defaults.access_settings),
            admin: self.admin.unwrap_or(defaults.admin),
        }
    }

    pub fn set(&mut self, permission: Permission, value: Option<bool>) {
        match permission {
            Permission::View => self.view = value,
            Permission::Create => self.create = value,
            Permission::Sanction => self.sanction = value,
            Permission::AccessSettings => self.access_settings = value,
            Permission::Admin => self.admin = value,
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == PermissionOverrides::default()
    }
}

pub fn defaults_for(role: Role) -> PermissionSet {
    match role {
        Role::Admin => PermissionSet {
            view: true,
            create: true,
            sanction: true,
            access_settings: true,
            admin: true,
        },
        Role::Principal => PermissionSet {
            view: true,
            create: true,
            sanction: true,
            ..PermissionSet::default()
        },
        Role::Educator | Role::Teacher => PermissionSet {
            view: true,
            create: true,
            ..PermissionSet::default()
        },
        Role::Other => PermissionSet {
            view: true,
            ..PermissionSet::default()
        },
    }
}

pub fn require(user: &User, permission: Permission) -> Result<(), AuthError> {
    if user.permissions().allows(permission) {
        Ok(())
    } else {
        Err(AuthError::Forbidden(permission))
    }
}
