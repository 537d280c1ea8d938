//! Static routing from event name to invalidation targets and notification.
//!
//! The router is pure: no I/O, no state. When a parameterized target cannot
//! be filled because the payload has no id, the broader prefix target is used
//! instead of dropping the event.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::event::{Event, Subject};
use super::event_types::*;
use super::notify::NotificationDescriptor;

/// A family of cached results that must be refetched.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum InvalidationTarget {
    /// One exact cache key, e.g. `detail:42`.
    Key(String),
    /// Every key starting with the prefix, e.g. `detail:`.
    Prefix(String),
}

impl InvalidationTarget {
    pub fn key(key: impl Into<String>) -> Self {
        Self::Key(key.into())
    }

    pub fn prefix(prefix: impl Into<String>) -> Self {
        Self::Prefix(prefix.into())
    }
}

impl fmt::Display for InvalidationTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Key(key) => f.write_str(key),
            Self::Prefix(prefix) => write!(f, "{prefix}*"),
        }
    }
}

/// How a route derives one target from an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetSpec {
    /// Unparameterized key, e.g. `list:records`.
    Fixed(&'static str),
    /// `<family>:<id>`, falling back to the `<family>:` prefix without an id.
    PerRecord(&'static str),
}

impl TargetSpec {
    fn resolve(&self, subject: &Subject) -> InvalidationTarget {
        match (self, subject) {
            (TargetSpec::PerRecord(family), Subject::Record(id)) => {
                InvalidationTarget::key(format!("{family}:{id}"))
            }
            _ => self.broad(),
        }
    }

    fn broad(&self) -> InvalidationTarget {
        match self {
            TargetSpec::Fixed(key) => InvalidationTarget::key(*key),
            TargetSpec::PerRecord(family) => InvalidationTarget::prefix(format!("{family}:")),
        }
    }
}

/// Placeholders `{id}` and `{<payload field>}` are filled at route time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NotificationTemplate {
    pub title: &'static str,
    pub body: &'static str,
    /// Used when `body` has a placeholder the payload cannot fill.
    pub fallback_body: &'static str,
    pub action: Option<&'static str>,
}

#[derive(Debug, Clone, Copy)]
pub struct Route {
    pub event: &'static str,
    pub window: WindowClass,
    pub targets: &'static [TargetSpec],
    pub notification: Option<NotificationTemplate>,
}

pub static ROUTES: &[Route] = &[
    Route {
        event: EVENT_RECORD_CREATED,
        window: WindowClass::HighFrequency,
        targets: &[
            TargetSpec::Fixed(KEY_LIST_RECORDS),
            TargetSpec::Fixed(KEY_STATS_DASHBOARD),
        ],
        notification: Some(NotificationTemplate {
            title: "New lead",
            body: "{name} was added",
            fallback_body: "A new lead was added",
            action: Some("/leads/{id}"),
        }),
    },
    Route {
        event: EVENT_RECORD_UPDATED,
        window: WindowClass::HighFrequency,
        targets: &[
            TargetSpec::PerRecord(FAMILY_DETAIL),
            TargetSpec::Fixed(KEY_LIST_RECORDS),
        ],
        notification: Some(NotificationTemplate {
            title: "Lead updated",
            body: "Lead {id} was updated",
            fallback_body: "A lead was updated",
            action: Some("/leads/{id}"),
        }),
    },
    Route {
        event: EVENT_RECORD_STATUS_UPDATED,
        window: WindowClass::HighFrequency,
        targets: &[
            TargetSpec::PerRecord(FAMILY_DETAIL),
            TargetSpec::Fixed(KEY_LIST_RECORDS),
            TargetSpec::Fixed(KEY_STATS_DASHBOARD),
        ],
        notification: Some(NotificationTemplate {
            title: "Lead status changed",
            body: "Lead {id} moved to {status}",
            fallback_body: "A lead changed status",
            action: Some("/leads/{id}"),
        }),
    },
    Route {
        event: EVENT_RECORD_DELETED,
        window: WindowClass::HighFrequency,
        targets: &[
            TargetSpec::PerRecord(FAMILY_DETAIL),
            TargetSpec::Fixed(KEY_LIST_RECORDS),
            TargetSpec::Fixed(KEY_STATS_DASHBOARD),
        ],
        notification: Some(NotificationTemplate {
            title: "Lead removed",
            body: "Lead {id} was deleted",
            fallback_body: "A lead was deleted",
            action: None,
        }),
    },
    Route {
        event: EVENT_RECORD_ASSIGNED,
        window: WindowClass::HighFrequency,
        targets: &[
            TargetSpec::PerRecord(FAMILY_DETAIL),
            TargetSpec::Fixed(KEY_LIST_RECORDS),
            TargetSpec::Fixed(KEY_LIST_ASSIGNMENTS),
        ],
        notification: Some(NotificationTemplate {
            title: "Lead assigned",
            body: "Lead {id} was assigned to {assignee}",
            fallback_body: "A lead was assigned",
            action: Some("/leads/{id}"),
        }),
    },
    Route {
        event: EVENT_RECORDS_BULK_ASSIGNED,
        window: WindowClass::LowFrequency,
        targets: &[
            TargetSpec::Fixed(KEY_LIST_RECORDS),
            TargetSpec::Fixed(KEY_LIST_ASSIGNMENTS),
            TargetSpec::Fixed(KEY_STATS_DASHBOARD),
        ],
        notification: Some(NotificationTemplate {
            title: "Leads assigned",
            body: "{count} leads were assigned",
            fallback_body: "Several leads were assigned",
            action: Some("/assignments"),
        }),
    },
    Route {
        event: EVENT_FOLLOWUP_DUE,
        window: WindowClass::LowFrequency,
        targets: &[
            TargetSpec::PerRecord(FAMILY_DETAIL),
            TargetSpec::Fixed(KEY_LIST_FOLLOWUPS),
        ],
        notification: Some(NotificationTemplate {
            title: "Follow-up due",
            body: "Follow-up for lead {id} is due",
            fallback_body: "A follow-up is due",
            action: Some("/leads/{id}"),
        }),
    },
    Route {
        event: EVENT_NOTE_ADDED,
        window: WindowClass::HighFrequency,
        targets: &[
            TargetSpec::PerRecord(FAMILY_NOTES),
            TargetSpec::PerRecord(FAMILY_DETAIL),
        ],
        notification: None,
    },
    Route {
        event: EVENT_SYNC_FAILED,
        window: WindowClass::LowFrequency,
        targets: &[],
        notification: Some(NotificationTemplate {
            title: "Sync failed",
            body: "{reason}",
            fallback_body: "Live updates could not be applied",
            action: None,
        }),
    },
];

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RouteOutcome {
    pub targets: Vec<InvalidationTarget>,
    pub notification: Option<NotificationDescriptor>,
}

#[derive(Debug, Clone, Copy)]
pub struct EventRouter {
    routes: &'static [Route],
}

impl Default for EventRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl EventRouter {
    pub fn new() -> Self {
        Self::with_routes(ROUTES)
    }

    pub fn with_routes(routes: &'static [Route]) -> Self {
        Self { routes }
    }

    pub fn lookup(&self, event_name: &str) -> Option<&'static Route> {
        self.routes.iter().find(|route| route.event == event_name)
    }

    pub fn event_names(&self) -> Vec<&'static str> {
        self.routes.iter().map(|route| route.event).collect()
    }

    /// Every unparameterized or prefix target the table can produce.
    pub fn broad_targets(&self) -> BTreeSet<InvalidationTarget> {
        self.routes
            .iter()
            .flat_map(|route| route.targets.iter().map(TargetSpec::broad))
            .collect()
    }

    /// Map an event to its targets and optional notification. Unknown event
    /// names produce an empty outcome.
    pub fn route(&self, event: &Event) -> RouteOutcome {
        let Some(route) = self.lookup(&event.name) else {
            return RouteOutcome::default();
        };
        let subject = event.subject();

        let mut targets: Vec<InvalidationTarget> = Vec::with_capacity(route.targets.len());
        for rule in route.targets {
            let target = rule.resolve(&subject);
            if !targets.contains(&target) {
                targets.push(target);
            }
        }

        let notification = route
            .notification
            .map(|template| build_notification(&template, event, &subject));

        RouteOutcome {
            targets,
            notification,
        }
    }
}

fn build_notification(
    template: &NotificationTemplate,
    event: &Event,
    subject: &Subject,
) -> NotificationDescriptor {
    let body = render(template.body, subject, &event.payload)
        .unwrap_or_else(|| template.fallback_body.to_string());
    let action_ref = template
        .action
        .and_then(|action| render(action, subject, &event.payload));
    let dedup_key = match subject {
        Subject::Record(id) => format!("{}:{}", event.name, id),
        Subject::Unidentified => event.name.clone(),
    };

    NotificationDescriptor {
        title: template.title.to_string(),
        body,
        tone: tone_for(&event.name),
        dedup_key,
        action_ref,
    }
}

/// Fill `{placeholder}`s. Returns `None` if any placeholder has no value.
fn render(template: &str, subject: &Subject, payload: &Value) -> Option<String> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let close = after.find('}')?;
        let name = &after[..close];
        out.push_str(&placeholder_value(name, subject, payload)?);
        rest = &after[close + 1..];
    }
    out.push_str(rest);
    Some(out)
}

fn placeholder_value(name: &str, subject: &Subject, payload: &Value) -> Option<String> {
    if name == "id" {
        return subject.record_id().map(|id| id.to_string());
    }
    match payload.get(name)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
