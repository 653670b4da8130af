//! Output slots
//!
//! One write-once cell per role. A slot is either published with the role's
//! findings or withheld (worker failed or timed out); whichever happens first
//! closes it for good. Once closed, readers need no lock.

use crate::error::SlotError;
use crate::workspace::RunWorkspace;
use audit_core::{FindingRecord, WorkerRole};
use once_cell::sync::OnceCell;
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Clone)]
enum SlotContent {
    Published(Arc<Vec<FindingRecord>>),
    Withheld,
}

/// Output slots of one run
#[derive(Debug)]
pub struct OutputSlots {
    slots: BTreeMap<WorkerRole, OnceCell<SlotContent>>,
    workspace: Option<Arc<RunWorkspace>>,
}

impl OutputSlots {
    /// In-memory slots for `roles`
    #[must_use]
    pub fn new(roles: &[WorkerRole]) -> Self {
        Self {
            slots: roles.iter().map(|r| (*r, OnceCell::new())).collect(),
            workspace: None,
        }
    }

    /// Slots mirrored to a run workspace
    #[must_use]
    pub fn with_workspace(roles: &[WorkerRole], workspace: Arc<RunWorkspace>) -> Self {
        Self {
            workspace: Some(workspace),
            ..Self::new(roles)
        }
    }

    /// Publish `findings` for `role`
    ///
    /// The in-memory slot is closed first; the on-disk copy follows.
    ///
    /// # Errors
    /// - `SlotError::Closed` if the slot was already published or withheld
    /// - `SlotError::UnknownRole` if the role has no slot
    /// - `SlotError::Persist` if the mirror write failed (the in-memory slot stays published)
    pub fn publish(&self, role: WorkerRole, findings: Vec<FindingRecord>) -> Result<(), SlotError> {
        let cell = self.cell(role)?;
        let findings = Arc::new(findings);
        cell.set(SlotContent::Published(Arc::clone(&findings)))
            .map_err(|_| SlotError::Closed(role))?;
        if let Some(workspace) = &self.workspace {
            workspace.write_slot(role, &findings)?;
        }
        Ok(())
    }

    /// Close `role`'s slot without content
    ///
    /// # Returns
    /// `true` if this call closed the slot, `false` if it was already closed
    ///
    /// # Errors
    /// `SlotError::UnknownRole` if the role has no slot.
    pub fn withhold(&self, role: WorkerRole) -> Result<bool, SlotError> {
        Ok(self.cell(role)?.set(SlotContent::Withheld).is_ok())
    }

    /// Published findings of `role`; `None` if withheld or still open
    #[must_use]
    pub fn findings(&self, role: WorkerRole) -> Option<Arc<Vec<FindingRecord>>> {
        match self.slots.get(&role)?.get()? {
            SlotContent::Published(findings) => Some(Arc::clone(findings)),
            SlotContent::Withheld => None,
        }
    }

    /// Check if `role`'s slot is closed
    #[must_use]
    pub fn is_closed(&self, role: WorkerRole) -> bool {
        self.slots.get(&role).is_some_and(|c| c.get().is_some())
    }

    /// Every published finding, ordered by role then record id
    #[must_use]
    pub fn collect(&self) -> Vec<(WorkerRole, FindingRecord)> {
        let mut all: Vec<(WorkerRole, FindingRecord)> = self
            .slots
            .keys()
            .filter_map(|role| self.findings(*role).map(|f| (*role, f)))
            .flat_map(|(role, findings)| {
                findings
                    .iter()
                    .cloned()
                    .map(move |record| (role, record))
                    .collect::<Vec<_>>()
            })
            .collect();
        all.sort_by(|a, b| (a.0, &a.1.id).cmp(&(b.0, &b.1.id)));
        all
    }

    fn cell(&self, role: WorkerRole) -> Result<&OnceCell<SlotContent>, SlotError> {
        self.slots.get(&role).ok_or(SlotError::UnknownRole(role))
    }
}
