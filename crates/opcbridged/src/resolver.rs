//! Resolves expected variable names to node handles.
//!
//! Walks a fixed, shallow path through a server's hierarchy:
//!
//! ```text
//! Root
//! └── Objects                  (first child of Root)
//!     └── Factory              (container, exact display name)
//!         ├── TemperatureSensors   (group)
//!         │   ├── Sensor1_Temperature
//!         │   └── Sensor2_Temperature
//!         └── SystemInfo           (group)
//!             ├── Uptime
//!             └── TotalProduction
//! ```
//!
//! A missing container or missing variables are not errors: the result is
//! simply smaller, and the missing names are logged. Only a failing
//! browse call is an error.

use std::collections::BTreeMap;

use opcbridge_core::{EndpointKey, LayoutConfig, VariableName, VariableSet};
use opcbridge_protocol::{AddressSpace, ClientError, NodeHandle};
use tracing::{debug, warn};

use crate::session::SessionError;

/// Resolved handles of one session, in name order.
pub type HandleMap = BTreeMap<VariableName, NodeHandle>;

/// Hierarchy walker for one deployment layout.
#[derive(Debug, Clone)]
pub struct Resolver {
    container: String,
    groups: Vec<String>,
    expected: VariableSet,
}

impl Resolver {
    pub fn new(layout: &LayoutConfig, expected: VariableSet) -> Self {
        Self {
            container: layout.container.clone(),
            groups: layout.groups.clone(),
            expected,
        }
    }

    pub fn expected(&self) -> &VariableSet {
        &self.expected
    }

    /// Walks the hierarchy of `space` and maps every expected name found.
    ///
    /// # Errors
    ///
    /// `SessionError::Resolution` if a browse or display-name call fails,
    /// or the root has no children at all.
    pub async fn resolve(
        &self,
        space: &dyn AddressSpace,
        endpoint: &EndpointKey,
    ) -> Result<HandleMap, SessionError> {
        let mut handles = HandleMap::new();

        let root = space.root().await.map_err(resolution("root"))?;
        let top = space.children(&root).await.map_err(resolution("browse root"))?;
        let objects = top.into_iter().next().ok_or_else(|| SessionError::Resolution {
            reason: "root node has no children".to_string(),
        })?;

        match self.find_child(space, &objects, &self.container).await? {
            Some(container) => {
                let groups = space
                    .children(&container)
                    .await
                    .map_err(resolution("browse container"))?;

                for group in groups {
                    let group_name = space
                        .display_name(&group)
                        .await
                        .map_err(resolution("group name"))?;
                    if !self.groups.iter().any(|g| g == &group_name) {
                        continue;
                    }

                    let variables = space
                        .children(&group)
                        .await
                        .map_err(resolution("browse group"))?;
                    for variable in variables {
                        let name = space
                            .display_name(&variable)
                            .await
                            .map_err(resolution("variable name"))?;
                        if self.expected.contains(&name) {
                            handles.insert(VariableName::from(name), variable);
                        }
                    }
                }
            }
            None => {
                debug!(
                    endpoint = %endpoint,
                    container = %self.container,
                    "Container object not found"
                );
            }
        }

        let missing = self.expected.missing(|name| handles.contains_key(name));
        if missing.is_empty() {
            debug!(endpoint = %endpoint, resolved = handles.len(), "All variables resolved");
        } else {
            warn!(
                endpoint = %endpoint,
                resolved = handles.len(),
                missing = ?missing.iter().map(|n| n.as_str()).collect::<Vec<_>>(),
                "Variables missing from address space"
            );
        }

        Ok(handles)
    }

    /// First child of `parent` whose display name equals `name`.
    async fn find_child(
        &self,
        space: &dyn AddressSpace,
        parent: &NodeHandle,
        name: &str,
    ) -> Result<Option<NodeHandle>, SessionError> {
        let children = space
            .children(parent)
            .await
            .map_err(resolution("browse objects"))?;
        for child in children {
            let display = space
                .display_name(&child)
                .await
                .map_err(resolution("object name"))?;
            if display == name {
                return Ok(Some(child));
            }
        }
        Ok(None)
    }
}

fn resolution(stage: &'static str) -> impl Fn(ClientError) -> SessionError {
    move |e| SessionError::Resolution {
        reason: format!("{stage}: {e}"),
    }
}
