//! Routing of newly created alarms to the notification dispatcher.

use std::sync::Arc;
use tracing::{debug, warn};

use crate::domain::{Alarm, Machine, Notification, NotificationPriority};
use crate::ports::{MachineRegistry, NotificationDispatcher};

/// Why a notification was or was not handed to the dispatcher
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotifyOutcome {
    Submitted,
    UnknownMachine,
    KindDisabled,
    NoRecipients,
    Failed(String),
}

/// Turns a new alarm into at most one dispatcher submission, honoring the
/// machine's notification config.
pub struct AlarmNotifier {
    registry: Arc<dyn MachineRegistry>,
    dispatcher: Arc<dyn NotificationDispatcher>,
}

impl AlarmNotifier {
    pub fn new(
        registry: Arc<dyn MachineRegistry>,
        dispatcher: Arc<dyn NotificationDispatcher>,
    ) -> Self {
        Self {
            registry,
            dispatcher,
        }
    }

    /// Never fails; dispatcher and registry errors are logged and reported
    /// through the outcome.
    pub async fn notify(&self, alarm: &Alarm) -> NotifyOutcome {
        let machine = match self.registry.get(&alarm.machine_id).await {
            Ok(Some(machine)) => machine,
            Ok(None) => {
                debug!(machine_id = %alarm.machine_id, "No registry entry, skipping notification");
                return NotifyOutcome::UnknownMachine;
            }
            Err(e) => {
                warn!(
                    machine_id = %alarm.machine_id,
                    alarm_id = %alarm.alarm_id,
                    error = %e,
                    "Failed to load notification config"
                );
                return NotifyOutcome::Failed(e.to_string());
            }
        };

        if !machine.notification.is_enabled(alarm.kind) {
            debug!(
                machine_id = %alarm.machine_id,
                kind = %alarm.kind,
                "Alarm kind not enabled for notifications"
            );
            return NotifyOutcome::KindDisabled;
        }

        if machine.notification.recipients.is_empty() {
            debug!(machine_id = %alarm.machine_id, "No notification recipients configured");
            return NotifyOutcome::NoRecipients;
        }

        let notification = build_notification(&machine, alarm);
        match self.dispatcher.submit(notification).await {
            Ok(()) => {
                debug!(alarm_id = %alarm.alarm_id, "Notification submitted");
                NotifyOutcome::Submitted
            }
            Err(e) => {
                warn!(
                    alarm_id = %alarm.alarm_id,
                    machine_id = %alarm.machine_id,
                    error = %e,
                    "Notification dispatch failed"
                );
                NotifyOutcome::Failed(e.to_string())
            }
        }
    }
}

pub fn build_notification(machine: &Machine, alarm: &Alarm) -> Notification {
    let subject = format!(
        "[{}] {} alarm on {}",
        alarm.severity.as_str().to_uppercase(),
        alarm.kind,
        machine.label()
    );

    let mut body = format!(
        "{}\n\nMachine: {}\nLocation: {}\nType: {}\nAlarm: {}\n",
        alarm.message,
        machine.label(),
        machine.location,
        machine.machine_type,
        alarm.alarm_id
    );
    let mut metadata: Vec<_> = alarm.metadata.iter().collect();
    metadata.sort();
    for (key, value) in metadata {
        body.push_str(&format!("{}: {}\n", key, value));
    }

    Notification {
        recipients: machine.notification.recipients.clone(),
        subject,
        body,
        priority: NotificationPriority::from(alarm.severity),
    }
}
