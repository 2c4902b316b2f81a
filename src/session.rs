use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Teacher,
    Student,
}

impl Role {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "admin" => Some(Role::Admin),
            "teacher" | "guru" => Some(Role::Teacher),
            "student" | "siswa" => Some(Role::Student),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Teacher => "teacher",
            Role::Student => "student",
        }
    }

    pub fn is_staff(self) -> bool {
        matches!(self, Role::Admin | Role::Teacher)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionUser {
    pub user_id: String,
    pub display_name: String,
    pub email: String,
    pub role: Role,
    pub student_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionDenied {
    NoSession,
    Forbidden(&'static str),
}

impl SessionDenied {
    pub fn code(self) -> &'static str {
        match self {
            SessionDenied::NoSession => "no_session",
            SessionDenied::Forbidden(_) => "forbidden",
        }
    }

    pub fn message(self) -> &'static str {
        match self {
            SessionDenied::NoSession => "open a session first",
            SessionDenied::Forbidden(m) => m,
        }
    }
}

/// Who is driving the daemon right now. Owned by `AppState` and handed to the
/// handlers that need it; opened by `session.open`, wiped by `session.close`.
#[derive(Debug, Default)]
pub struct SessionContext {
    user: Option<SessionUser>,
    opened_at: Option<String>,
}

impl SessionContext {
    pub fn open(&mut self, user: SessionUser) {
        self.user = Some(user);
        self.opened_at = Some(chrono::Utc::now().to_rfc3339());
    }

    pub fn close(&mut self) -> Option<SessionUser> {
        self.opened_at = None;
        self.user.take()
    }

    pub fn user(&self) -> Option<&SessionUser> {
        self.user.as_ref()
    }

    pub fn require_user(&self) -> Result<&SessionUser, SessionDenied> {
        self.user.as_ref().ok_or(SessionDenied::NoSession)
    }

    pub fn require_staff(&self) -> Result<&SessionUser, SessionDenied> {
        let user = self.require_user()?;
        if user.role.is_staff() {
            Ok(user)
        } else {
            Err(SessionDenied::Forbidden("teacher or admin role required"))
        }
    }

    pub fn require_admin(&self) -> Result<&SessionUser, SessionDenied> {
        let user = self.require_user()?;
        if user.role == Role::Admin {
            Ok(user)
        } else {
            Err(SessionDenied::Forbidden("admin role required"))
        }
    }

    /// Staff may read any student; a student only their own records.
    pub fn require_student_access(&self, student_id: &str) -> Result<&SessionUser, SessionDenied> {
        let user = self.require_user()?;
        if user.role.is_staff() || user.student_id.as_deref() == Some(student_id) {
            Ok(user)
        } else {
            Err(SessionDenied::Forbidden("students may only read their own grades"))
        }
    }

    pub fn summary(&self) -> serde_json::Value {
        match self.user.as_ref() {
            Some(u) => serde_json::json!({
                "userId": u.user_id,
                "displayName": u.display_name,
                "role": u.role,
                "openedAt": self.opened_at,
            }),
            None => serde_json::Value::Null,
        }
    }
}
