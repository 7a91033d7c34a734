//! Capability checks.
//!
//! Every operation calls [`authorize`] exactly once with the actor, the
//! ownership facts of the resource it is about to touch, and the action it
//! intends to perform. Rules live here and nowhere else.

use serde::{Deserialize, Serialize};

use crate::error::{RentalError, RentalResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    FranchiseOwner,
    ServiceAgent,
    Customer,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::FranchiseOwner => "franchise_owner",
            Role::ServiceAgent => "service_agent",
            Role::Customer => "customer",
        }
    }

    pub fn parse(s: &str) -> RentalResult<Self> {
        match s {
            "admin" => Ok(Role::Admin),
            "franchise_owner" => Ok(Role::FranchiseOwner),
            "service_agent" => Ok(Role::ServiceAgent),
            "customer" => Ok(Role::Customer),
            other => Err(RentalError::Validation(format!("unknown role: {other}"))),
        }
    }
}

/// Authenticated caller, as handed over by the transport layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor {
    pub user_id: i64,
    pub role: Role,
}

impl Actor {
    pub fn new(user_id: i64, role: Role) -> Self {
        Self { user_id, role }
    }
}

/// Who owns, manages and services a given entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ownership {
    pub customer_id: i64,
    /// Owner of the franchise the entity is booked under, if one is set.
    pub franchise_owner_id: Option<i64>,
    pub agent_id: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    /// Creation of a new entity; nothing to own yet.
    Fresh,
    Owned(Ownership),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    PlaceOrder,
    ManageOrder,
    ReassignFranchise,
    /// Pay, cancel, open a service request or leave feedback on one's own entity.
    ActAsCustomer,
    ManageSubscription,
    ConfigureSubscription,
    WorkServiceRequest,
    AssignAgent,
    /// Read a single entity: its customer, its franchise owner, its agent, or an admin.
    View,
}

impl Action {
    fn as_str(&self) -> &'static str {
        match self {
            Action::PlaceOrder => "place_order",
            Action::ManageOrder => "manage_order",
            Action::ReassignFranchise => "reassign_franchise",
            Action::ActAsCustomer => "act_as_customer",
            Action::ManageSubscription => "manage_subscription",
            Action::ConfigureSubscription => "configure_subscription",
            Action::WorkServiceRequest => "work_service_request",
            Action::AssignAgent => "assign_agent",
            Action::View => "view",
        }
    }
}

pub fn authorize(actor: &Actor, resource: &Resource, action: Action) -> RentalResult<()> {
    let allowed = match (action, resource) {
        (Action::PlaceOrder, _) => actor.role == Role::Customer,
        (Action::ReassignFranchise, _) => actor.role == Role::Admin,
        (_, Resource::Fresh) => false,
        (Action::ActAsCustomer, Resource::Owned(o)) => o.customer_id == actor.user_id,
        (Action::ManageOrder | Action::ManageSubscription | Action::AssignAgent, Resource::Owned(o)) => {
            is_admin(actor) || is_franchise_owner_of(actor, o)
        }
        (Action::WorkServiceRequest, Resource::Owned(o)) => {
            is_admin(actor) || is_franchise_owner_of(actor, o) || is_assigned_agent(actor, o)
        }
        (Action::ConfigureSubscription | Action::View, Resource::Owned(o)) => {
            is_admin(actor)
                || is_franchise_owner_of(actor, o)
                || is_assigned_agent(actor, o)
                || o.customer_id == actor.user_id
        }
    };

    if allowed {
        Ok(())
    } else {
        Err(RentalError::PermissionDenied(format!(
            "{} may not {}",
            actor.role.as_str(),
            action.as_str()
        )))
    }
}

/// Which rows a listing returns for the actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewScope {
    All,
    /// Rows booked under franchises owned by this user.
    FranchiseOwner(i64),
    /// Rows assigned to this agent.
    Agent(i64),
    Customer(i64),
}

impl ViewScope {
    pub fn for_actor(actor: &Actor) -> Self {
        match actor.role {
            Role::Admin => ViewScope::All,
            Role::FranchiseOwner => ViewScope::FranchiseOwner(actor.user_id),
            Role::ServiceAgent => ViewScope::Agent(actor.user_id),
            Role::Customer => ViewScope::Customer(actor.user_id),
        }
    }
}

fn is_admin(actor: &Actor) -> bool {
    actor.role == Role::Admin
}

fn is_franchise_owner_of(actor: &Actor, o: &Ownership) -> bool {
    actor.role == Role::FranchiseOwner && o.franchise_owner_id == Some(actor.user_id)
}

fn is_assigned_agent(actor: &Actor, o: &Ownership) -> bool {
    actor.role == Role::ServiceAgent && o.agent_id == Some(actor.user_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    const OWNED: Resource = Resource::Owned(Ownership {
        customer_id: 10,
        franchise_owner_id: Some(20),
        agent_id: Some(30),
    });

    #[test]
    fn only_customers_place_orders() {
        assert!(authorize(&Actor::new(10, Role::Customer), &Resource::Fresh, Action::PlaceOrder).is_ok());
        assert!(authorize(&Actor::new(1, Role::Admin), &Resource::Fresh, Action::PlaceOrder).is_err());
    }

    #[test]
    fn franchise_owner_limited_to_own_franchise() {
        let own = Actor::new(20, Role::FranchiseOwner);
        let other = Actor::new(21, Role::FranchiseOwner);
        assert!(authorize(&own, &OWNED, Action::ManageOrder).is_ok());
        let err = authorize(&other, &OWNED, Action::ManageOrder).unwrap_err();
        assert_eq!(err.kind(), "PERMISSION_DENIED");
    }

    #[test]
    fn admin_manages_everything_but_cannot_act_as_customer() {
        let admin = Actor::new(1, Role::Admin);
        assert!(authorize(&admin, &OWNED, Action::ManageSubscription).is_ok());
        assert!(authorize(&admin, &OWNED, Action::AssignAgent).is_ok());
        assert!(authorize(&admin, &OWNED, Action::ActAsCustomer).is_err());
    }

    #[test]
    fn agent_works_only_assigned_requests() {
        let assigned = Actor::new(30, Role::ServiceAgent);
        let stranger = Actor::new(31, Role::ServiceAgent);
        assert!(authorize(&assigned, &OWNED, Action::WorkServiceRequest).is_ok());
        assert!(authorize(&stranger, &OWNED, Action::WorkServiceRequest).is_err());
        assert!(authorize(&assigned, &OWNED, Action::AssignAgent).is_err());
    }

    #[test]
    fn customer_may_configure_own_subscription() {
        assert!(authorize(&Actor::new(10, Role::Customer), &OWNED, Action::ConfigureSubscription).is_ok());
        assert!(authorize(&Actor::new(11, Role::Customer), &OWNED, Action::ConfigureSubscription).is_err());
    }

    #[test]
    fn unowned_franchise_denies_owner() {
        let res = Resource::Owned(Ownership {
            customer_id: 10,
            franchise_owner_id: None,
            agent_id: None,
        });
        assert!(authorize(&Actor::new(20, Role::FranchiseOwner), &res, Action::ManageOrder).is_err());
    }

    #[test]
    fn view_follows_ownership_chain() {
        for a in [
            Actor::new(1, Role::Admin),
            Actor::new(10, Role::Customer),
            Actor::new(20, Role::FranchiseOwner),
            Actor::new(30, Role::ServiceAgent),
        ] {
            assert!(authorize(&a, &OWNED, Action::View).is_ok(), "{a:?}");
        }
        for a in [
            Actor::new(11, Role::Customer),
            Actor::new(21, Role::FranchiseOwner),
            Actor::new(31, Role::ServiceAgent),
        ] {
            let err = authorize(&a, &OWNED, Action::View).unwrap_err();
            assert_eq!(err.kind(), "PERMISSION_DENIED");
        }
    }

    #[test]
    fn listing_scope_tracks_role() {
        assert_eq!(ViewScope::for_actor(&Actor::new(1, Role::Admin)), ViewScope::All);
        assert_eq!(
            ViewScope::for_actor(&Actor::new(20, Role::FranchiseOwner)),
            ViewScope::FranchiseOwner(20)
        );
        assert_eq!(ViewScope::for_actor(&Actor::new(30, Role::ServiceAgent)), ViewScope::Agent(30));
        assert_eq!(ViewScope::for_actor(&Actor::new(10, Role::Customer)), ViewScope::Customer(10));
    }

    #[test]
    fn role_round_trips_through_text() {
        for r in [Role::Admin, Role::FranchiseOwner, Role::ServiceAgent, Role::Customer] {
            assert_eq!(Role::parse(r.as_str()).unwrap(), r);
        }
        assert!(Role::parse("owner").is_err());
    }
}
