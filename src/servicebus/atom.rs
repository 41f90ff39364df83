//! Atom entries for the Service Bus management api.
//!
//! The service deserializes descriptions with a data contract serializer, so elements
//! must appear in the contract's order. Only the members provisioning sets are written,
//! the rest keep their service defaults.

use std::time::Duration;

use crate::entity::{EntityDescriptor, EntityKind};

const SERVICEBUS_NS: &str = "http://schemas.microsoft.com/netservices/2010/10/servicebus/connect";
const INSTANCE_NS: &str = "http://www.w3.org/2001/XMLSchema-instance";

pub fn entry(entity: &EntityDescriptor) -> String {
    let (element, members) = match entity.kind {
        EntityKind::Topic => ("TopicDescription", topic_members(entity)),
        EntityKind::Queue => ("QueueDescription", queue_members(entity)),
    };

    let mut xml = String::new();
    xml.push_str(r#"<?xml version="1.0" encoding="utf-8"?>"#);
    xml.push_str(r#"<entry xmlns="http://www.w3.org/2005/Atom">"#);
    xml.push_str(r#"<content type="application/xml">"#);
    xml.push_str(&format!(
        r#"<{element} xmlns="{SERVICEBUS_NS}" xmlns:i="{INSTANCE_NS}">"#
    ));
    for (name, value) in members {
        xml.push_str(&format!("<{name}>{value}</{name}>"));
    }
    xml.push_str(&format!("</{element}>"));
    xml.push_str("</content></entry>");
    xml
}

fn topic_members(topic: &EntityDescriptor) -> Vec<(&'static str, String)> {
    let mut members = vec![
        ("MaxSizeInMegabytes", topic.max_size_in_mb.to_string()),
        (
            "EnableBatchedOperations",
            topic.enable_batched_operations.to_string(),
        ),
    ];
    if let Some(idle) = topic.auto_delete_on_idle {
        members.push(("AutoDeleteOnIdle", iso8601_duration(idle)));
    }
    members.push(("EnablePartitioning", topic.enable_partitioning.to_string()));
    members
}

fn queue_members(queue: &EntityDescriptor) -> Vec<(&'static str, String)> {
    let mut members = Vec::new();
    if let Some(lock) = queue.lock_duration {
        members.push(("LockDuration", iso8601_duration(lock)));
    }
    members.push(("MaxSizeInMegabytes", queue.max_size_in_mb.to_string()));
    if let Some(count) = queue.max_delivery_count {
        members.push(("MaxDeliveryCount", count.to_string()));
    }
    members.push((
        "EnableBatchedOperations",
        queue.enable_batched_operations.to_string(),
    ));
    if let Some(idle) = queue.auto_delete_on_idle {
        members.push(("AutoDeleteOnIdle", iso8601_duration(idle)));
    }
    members.push(("EnablePartitioning", queue.enable_partitioning.to_string()));
    members
}

/// `xs:duration` as the service writes it, e.g. `PT5M`, `P1DT2H`, `PT0.5S`.
pub fn iso8601_duration(duration: Duration) -> String {
    let total = duration.as_secs();
    let (days, hours, minutes, seconds) = (
        total / 86_400,
        total % 86_400 / 3_600,
        total % 3_600 / 60,
        total % 60,
    );
    let millis = duration.subsec_millis();

    let mut out = String::from("P");
    if days > 0 {
        out.push_str(&format!("{days}D"));
    }
    if hours == 0 && minutes == 0 && seconds == 0 && millis == 0 {
        if days == 0 {
            out.push_str("T0S");
        }
        return out;
    }
    out.push('T');
    if hours > 0 {
        out.push_str(&format!("{hours}H"));
    }
    if minutes > 0 {
        out.push_str(&format!("{minutes}M"));
    }
    if millis > 0 {
        let fraction = format!("{millis:03}");
        out.push_str(&format!("{seconds}.{}S", fraction.trim_end_matches('0')));
    } else if seconds > 0 {
        out.push_str(&format!("{seconds}S"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::EntitySettings;

    fn settings(idle: Option<Duration>) -> EntitySettings {
        EntitySettings {
            max_size_in_mb: 5120,
            auto_delete_on_idle: idle,
            enable_partitioning: false,
        }
    }

    #[test]
    fn durations() {
        assert_eq!(iso8601_duration(Duration::ZERO), "PT0S");
        assert_eq!(iso8601_duration(Duration::from_secs(300)), "PT5M");
        assert_eq!(iso8601_duration(Duration::from_secs(5400)), "PT1H30M");
        assert_eq!(iso8601_duration(Duration::from_secs(86_400)), "P1D");
        assert_eq!(iso8601_duration(Duration::from_secs(93_601)), "P1DT2H1S");
        assert_eq!(iso8601_duration(Duration::from_millis(1_500)), "PT1.5S");
        assert_eq!(iso8601_duration(Duration::from_millis(250)), "PT0.25S");
        assert_eq!(
            iso8601_duration(Duration::from_millis(7 * 86_400_000 + 61_010)),
            "P7DT1M1.01S"
        );
    }

    #[test]
    fn queue_entry_keeps_contract_order() {
        let queue = EntityDescriptor::queue(
            "order.create".parse().unwrap(),
            &settings(Some(Duration::from_secs(3600))),
        );
        let xml = entry(&queue);

        assert!(xml.starts_with(r#"<?xml version="1.0" encoding="utf-8"?><entry"#));
        assert!(xml.contains(&format!(r#"<QueueDescription xmlns="{SERVICEBUS_NS}""#)));

        let order = [
            "<LockDuration>PT5M</LockDuration>",
            "<MaxSizeInMegabytes>5120</MaxSizeInMegabytes>",
            "<MaxDeliveryCount>2147483647</MaxDeliveryCount>",
            "<EnableBatchedOperations>true</EnableBatchedOperations>",
            "<AutoDeleteOnIdle>PT1H</AutoDeleteOnIdle>",
            "<EnablePartitioning>false</EnablePartitioning>",
        ];
        let positions: Vec<usize> = order
            .iter()
            .map(|member| xml.find(member).unwrap_or_else(|| panic!("{member} missing")))
            .collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]), "{xml}");
    }

    #[test]
    fn topic_entry_has_no_queue_members() {
        let topic = EntityDescriptor::topic("audit".parse().unwrap(), &settings(None));
        let xml = entry(&topic);

        assert!(xml.contains("<TopicDescription "));
        assert!(xml.contains("<MaxSizeInMegabytes>5120</MaxSizeInMegabytes>"));
        assert!(xml.contains("<EnableBatchedOperations>true</EnableBatchedOperations>"));
        assert!(!xml.contains("LockDuration"));
        assert!(!xml.contains("MaxDeliveryCount"));
        assert!(!xml.contains("AutoDeleteOnIdle"));
        assert!(xml.ends_with("</TopicDescription></content></entry>"));
    }
}
