//! The currently displayed project and session.

use canopy_protocol::{ProjectSnapshot, SessionId};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    /// Project name.
    pub project: Option<String>,
    pub session: Option<SessionId>,
}

impl Selection {
    pub fn new(project: impl Into<String>, session: SessionId) -> Self {
        Self {
            project: Some(project.into()),
            session: Some(session),
        }
    }

    pub fn project_only(project: impl Into<String>) -> Self {
        Self {
            project: Some(project.into()),
            session: None,
        }
    }

    /// Both halves, when both are set.
    pub fn pair(&self) -> Option<(&str, &SessionId)> {
        Some((self.project.as_deref()?, self.session.as_ref()?))
    }

    pub fn resolve_project<'a>(&self, projects: &'a [ProjectSnapshot]) -> Option<&'a ProjectSnapshot> {
        let name = self.project.as_deref()?;
        find_project(projects, name)
    }
}

pub fn find_project<'a>(projects: &'a [ProjectSnapshot], name: &str) -> Option<&'a ProjectSnapshot> {
    projects.iter().find(|p| p.name == name)
}
