//! Channel registry
//!
//! Static table of the standard broadcast channels in the 8790-8799 port
//! range. A channel's group name is by convention equal to its channel
//! name.

use std::fmt;
use std::str::FromStr;

use crate::protocol::Priority;

/// First port of the emergency range
pub const PORT_EMERGENCY: u16 = 8790;
/// Last port of the emergency range
pub const PORT_SAR: u16 = 8794;

/// Listener behaviour when an emergency broadcast appears on a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutoTune {
    Never,
    Prompt,
    Always,
}

impl AutoTune {
    pub fn as_str(&self) -> &'static str {
        match self {
            AutoTune::Never => "never",
            AutoTune::Prompt => "prompt",
            AutoTune::Always => "always",
        }
    }
}

impl fmt::Display for AutoTune {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AutoTune {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "always" => AutoTune::Always,
            "prompt" => AutoTune::Prompt,
            _ => AutoTune::Never,
        })
    }
}

/// Static configuration of one broadcast channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Channel {
    pub name: &'static str,
    pub port: u16,
    pub priority: Priority,
    pub auto_tune: AutoTune,
    pub description: &'static str,
}

impl Channel {
    /// A channel is an emergency channel iff its priority is at least
    /// Emergency.
    pub fn is_emergency(&self) -> bool {
        self.priority >= Priority::Emergency
    }
}

/// The standard channel table
pub const STANDARD_CHANNELS: &[Channel] = &[
    Channel {
        name: "emergency",
        port: 8790,
        priority: Priority::Critical,
        auto_tune: AutoTune::Always,
        description: "General emergency broadcast - active emergency in progress",
    },
    Channel {
        name: "netcontrol",
        port: 8791,
        priority: Priority::Emergency,
        auto_tune: AutoTune::Prompt,
        description: "Emergency net control - coordination and resource management",
    },
    Channel {
        name: "medical",
        port: 8792,
        priority: Priority::Emergency,
        auto_tune: AutoTune::Prompt,
        description: "Medical emergency coordination - health and safety",
    },
    Channel {
        name: "weather",
        port: 8793,
        priority: Priority::High,
        auto_tune: AutoTune::Never,
        description: "Weather alerts and warnings - severe weather notifications",
    },
    Channel {
        name: "sar",
        port: 8794,
        priority: Priority::Emergency,
        auto_tune: AutoTune::Prompt,
        description: "Search and rescue - missing persons and rescue operations",
    },
    Channel {
        name: "community",
        port: 8795,
        priority: Priority::Normal,
        auto_tune: AutoTune::Never,
        description: "Community service - public announcements and community info",
    },
    Channel {
        name: "talk",
        port: 8798,
        priority: Priority::Normal,
        auto_tune: AutoTune::Never,
        description: "General conversation - casual communication",
    },
    Channel {
        name: "test",
        port: 8799,
        priority: Priority::Normal,
        auto_tune: AutoTune::Never,
        description: "Testing - system testing and development",
    },
];

/// Lookups over the static channel table
#[derive(Debug, Clone, Copy, Default)]
pub struct ChannelRegistry;

impl ChannelRegistry {
    pub fn new() -> Self {
        Self
    }

    pub fn get(&self, name: &str) -> Option<Channel> {
        STANDARD_CHANNELS.iter().copied().find(|c| c.name == name)
    }

    /// Group names map 1:1 onto channel names
    pub fn get_by_group(&self, group: &str) -> Option<Channel> {
        self.get(group)
    }

    pub fn get_by_port(&self, port: u16) -> Option<Channel> {
        STANDARD_CHANNELS.iter().copied().find(|c| c.port == port)
    }

    pub fn list(&self) -> &'static [Channel] {
        STANDARD_CHANNELS
    }

    pub fn list_emergency(&self) -> Vec<Channel> {
        STANDARD_CHANNELS
            .iter()
            .copied()
            .filter(Channel::is_emergency)
            .collect()
    }

    /// Priority for a group, Normal when the group is unknown
    pub fn priority_for_group(&self, group: &str) -> Priority {
        self.get_by_group(group)
            .map(|c| c.priority)
            .unwrap_or(Priority::Normal)
    }
}

/// True when `port` is inside the emergency range
pub fn is_emergency_port(port: u16) -> bool {
    (PORT_EMERGENCY..=PORT_SAR).contains(&port)
}

/// Listener preferences for reacting to priority-change events.
///
/// The core only surfaces events; whether to retune is decided here by
/// the host.
#[derive(Debug, Clone)]
pub struct TunePreferences {
    pub auto_tune: AutoTune,
    /// Channels eligible for automatic tuning
    pub critical_channels: Vec<&'static str>,
}

impl Default for TunePreferences {
    fn default() -> Self {
        Self {
            auto_tune: AutoTune::Prompt,
            critical_channels: vec!["emergency", "netcontrol", "medical", "sar"],
        }
    }
}

impl TunePreferences {
    /// Should the host switch channels without asking?
    pub fn should_auto_tune(&self, channel: &str, priority: Priority) -> bool {
        self.auto_tune == AutoTune::Always
            && priority >= Priority::Emergency
            && self.critical_channels.contains(&channel)
    }

    /// Should the host ask the user to switch?
    pub fn needs_prompt(&self, priority: Priority) -> bool {
        self.auto_tune == AutoTune::Prompt && priority >= Priority::Emergency
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_lookups() {
        let registry = ChannelRegistry::new();

        let ch = registry.get("emergency").unwrap();
        assert_eq!(ch.port, 8790);
        assert_eq!(ch.priority, Priority::Critical);
        assert_eq!(ch.auto_tune, AutoTune::Always);

        assert_eq!(registry.get_by_port(8793).unwrap().name, "weather");
        assert_eq!(registry.get_by_group("sar").unwrap().port, 8794);
        assert!(registry.get("pirate").is_none());
    }

    #[test]
    fn emergency_predicates() {
        let registry = ChannelRegistry::new();
        assert!(registry.get("medical").unwrap().is_emergency());
        assert!(!registry.get("weather").unwrap().is_emergency());

        let emergency: Vec<_> = registry.list_emergency().iter().map(|c| c.name).collect();
        assert_eq!(emergency, vec!["emergency", "netcontrol", "medical", "sar"]);

        assert!(is_emergency_port(8790));
        assert!(is_emergency_port(8794));
        assert!(!is_emergency_port(8795));
        assert!(!is_emergency_port(8789));
    }

    #[test]
    fn unknown_group_defaults_to_normal() {
        let registry = ChannelRegistry::new();
        assert_eq!(registry.priority_for_group("nonsense"), Priority::Normal);
        assert_eq!(registry.priority_for_group("emergency"), Priority::Critical);
    }

    #[test]
    fn tune_preferences() {
        let mut prefs = TunePreferences::default();
        assert!(prefs.needs_prompt(Priority::Emergency));
        assert!(!prefs.needs_prompt(Priority::High));
        assert!(!prefs.should_auto_tune("emergency", Priority::Critical));

        prefs.auto_tune = AutoTune::Always;
        assert!(prefs.should_auto_tune("emergency", Priority::Critical));
        assert!(!prefs.should_auto_tune("weather", Priority::Critical));
    }
}
