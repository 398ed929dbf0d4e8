use crate::Capabilities;
use serde::Serialize;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct QuickAction {
    pub id: &'static str,
    pub label: &'static str,
    pub route: &'static str,
    pub admin_only: bool,
}

pub const QUICK_ACTIONS: &[QuickAction] = &[
    QuickAction {
        id: "paste-client",
        label: "Paste client info",
        route: "/assignments/parse",
        admin_only: false,
    },
    QuickAction {
        id: "assignments",
        label: "Agent assignments",
        route: "/assignments",
        admin_only: false,
    },
    QuickAction {
        id: "clients",
        label: "Clients",
        route: "/clients",
        admin_only: false,
    },
    QuickAction {
        id: "orders",
        label: "Orders",
        route: "/orders",
        admin_only: false,
    },
    QuickAction {
        id: "deposits",
        label: "Deposits",
        route: "/deposits",
        admin_only: false,
    },
    QuickAction {
        id: "withdrawals",
        label: "Withdrawals",
        route: "/withdrawals",
        admin_only: false,
    },
    QuickAction {
        id: "migrate",
        label: "Migrate local data",
        route: "/admin/migrate",
        admin_only: true,
    },
];

pub fn quick_actions_for(capabilities: &Capabilities) -> Vec<QuickAction> {
    QUICK_ACTIONS
        .iter()
        .filter(|action| capabilities.admin || !action.admin_only)
        .copied()
        .collect()
}
