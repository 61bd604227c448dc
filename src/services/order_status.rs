//! Order and payment status rules. Pure functions only; persistence lives in
//! [`crate::services::orders`] and [`crate::services::payment_notifications`].

use serde::Serialize;

use crate::{
    entities::{order, OrderStatus, PaymentStatus},
    errors::ServiceError,
};

pub const TRACKING_NUMBER_MIN_LEN: usize = 8;
pub const TRACKING_NUMBER_MAX_LEN: usize = 30;

impl OrderStatus {
    /// Targets reachable from this status by an explicit transition.
    pub fn allowed_transitions(self) -> &'static [OrderStatus] {
        match self {
            OrderStatus::Pending => &[OrderStatus::Packaged, OrderStatus::Cancelled],
            OrderStatus::Packaged => &[OrderStatus::Shipped, OrderStatus::Cancelled],
            OrderStatus::Shipped => &[OrderStatus::Completed],
            OrderStatus::Completed | OrderStatus::Cancelled => &[],
        }
    }

    pub fn can_transition_to(self, target: OrderStatus) -> bool {
        self.allowed_transitions().contains(&target)
    }

    /// Statuses for which the carrier has a parcel to track.
    pub fn is_trackable(self) -> bool {
        matches!(self, OrderStatus::Shipped | OrderStatus::Completed)
    }

    /// Owners may cancel until the parcel leaves the warehouse.
    pub fn is_user_cancellable(self) -> bool {
        matches!(self, OrderStatus::Pending | OrderStatus::Packaged)
    }
}

impl PaymentStatus {
    pub fn is_final(self) -> bool {
        matches!(
            self,
            PaymentStatus::Failed | PaymentStatus::Expired | PaymentStatus::Refunded
        )
    }

    /// Monotonicity guard for gateway notifications. Re-applying the current
    /// status is allowed (it changes nothing); moving backwards is not.
    pub fn can_advance_to(self, next: PaymentStatus) -> bool {
        if self == next {
            return true;
        }
        match self {
            PaymentStatus::Pending => true,
            PaymentStatus::Challenge => matches!(
                next,
                PaymentStatus::Paid | PaymentStatus::Failed | PaymentStatus::Refunded
            ),
            PaymentStatus::Paid => matches!(next, PaymentStatus::Failed | PaymentStatus::Refunded),
            PaymentStatus::Failed | PaymentStatus::Expired | PaymentStatus::Refunded => false,
        }
    }

    /// Payment status recorded when staff or the owner cancels the order.
    pub fn after_manual_cancel(self) -> PaymentStatus {
        match self {
            PaymentStatus::Paid | PaymentStatus::Refunded => PaymentStatus::Refunded,
            _ => PaymentStatus::Failed,
        }
    }
}

/// Validated effect of moving one order to a new status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransitionPlan {
    pub from: OrderStatus,
    pub to: OrderStatus,
    pub tracking_number: Option<String>,
    pub carrier_name: Option<String>,
    pub stamp_shipped: bool,
    pub stamp_completed: bool,
    pub stamp_cancelled: bool,
    pub restore_stock: bool,
}

/// Checks a requested transition against the legal graph. Shipping requires a
/// tracking number and a carrier; the carrier falls back to the one chosen at
/// checkout.
pub fn plan_transition(
    order: &order::Model,
    target: OrderStatus,
    tracking_number: Option<&str>,
    carrier_name: Option<&str>,
) -> Result<TransitionPlan, ServiceError> {
    let from = order.status;
    if !from.can_transition_to(target) {
        return Err(ServiceError::InvalidTransition {
            from: from.to_string(),
            to: target.to_string(),
        });
    }

    let mut plan = TransitionPlan {
        from,
        to: target,
        tracking_number: None,
        carrier_name: None,
        stamp_shipped: false,
        stamp_completed: false,
        stamp_cancelled: false,
        restore_stock: false,
    };

    match target {
        OrderStatus::Shipped => {
            let tracking = non_blank(tracking_number).ok_or(ServiceError::MissingTrackingInfo)?;
            let carrier = non_blank(carrier_name)
                .or_else(|| non_blank(Some(order.carrier_name.as_str())))
                .ok_or(ServiceError::MissingTrackingInfo)?;
            plan.tracking_number = Some(validate_tracking_number(tracking)?);
            plan.carrier_name = Some(carrier.to_string());
            plan.stamp_shipped = true;
        }
        OrderStatus::Completed => plan.stamp_completed = true,
        OrderStatus::Cancelled => {
            plan.stamp_cancelled = true;
            plan.restore_stock = true;
        }
        OrderStatus::Pending | OrderStatus::Packaged => {}
    }

    Ok(plan)
}

pub fn validate_tracking_number(raw: &str) -> Result<String, ServiceError> {
    let tracking = raw.trim();
    let len = tracking.chars().count();
    if !(TRACKING_NUMBER_MIN_LEN..=TRACKING_NUMBER_MAX_LEN).contains(&len)
        || !tracking.chars().all(|c| c.is_ascii_alphanumeric())
    {
        return Err(ServiceError::ValidationError(format!(
            "Tracking number must be {}-{} letters or digits",
            TRACKING_NUMBER_MIN_LEN, TRACKING_NUMBER_MAX_LEN
        )));
    }
    Ok(tracking.to_uppercase())
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}
