// =============================================================================
// models.rs — TRIPS, FARES, AND THE STATES IN BETWEEN
// =============================================================================
//
// The data that flows through settlement. A trip is born CREATED with no
// fare, gets priced, gets written down, gets billed, and ends up PAID or
// FAILED. Nothing here does I/O; these are plain values with a few rules
// about which values are legal.
// =============================================================================

use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::SettlementError;

/// Money is carried with two decimal places, rounded half-up.
pub fn round_money(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// The recognized transport modes. Anything else is rejected before a
/// single cent is computed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum TransportMode {
    /// City bus.
    Bus,
    /// Bus rapid transit.
    Brt,
    /// Regional express train.
    Ter,
}

impl TransportMode {
    pub const ALL: [TransportMode; 3] = [TransportMode::Bus, TransportMode::Brt, TransportMode::Ter];
}

impl fmt::Display for TransportMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportMode::Bus => write!(f, "BUS"),
            TransportMode::Brt => write!(f, "BRT"),
            TransportMode::Ter => write!(f, "TER"),
        }
    }
}

impl FromStr for TransportMode {
    type Err = SettlementError;

    /// Case-insensitive, surrounding whitespace ignored.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "BUS" => Ok(TransportMode::Bus),
            "BRT" => Ok(TransportMode::Brt),
            "TER" => Ok(TransportMode::Ter),
            other => Err(SettlementError::InvalidInput(format!(
                "unknown transport mode: {other}. Accepted values: BUS, BRT, TER"
            ))),
        }
    }
}

/// Settlement state machine: `Created -> {Paid, Failed}`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum SettlementStatus {
    Created,
    Paid,
    Failed,
}

impl SettlementStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SettlementStatus::Created)
    }
}

impl fmt::Display for SettlementStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SettlementStatus::Created => write!(f, "CREATED"),
            SettlementStatus::Paid => write!(f, "PAID"),
            SettlementStatus::Failed => write!(f, "FAILED"),
        }
    }
}

/// The result of one pricing computation.
///
/// `final_fare = max(0, base_fare - discount)`, then clamped to the daily
/// cap when the cap is enforced. Discounts are each taken off the base fare
/// and summed, never compounded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FareBreakdown {
    pub base_fare: Decimal,
    pub discount: Decimal,
    pub final_fare: Decimal,
    pub off_peak_applied: bool,
    pub loyalty_applied: bool,
    pub cap_applied: bool,
}

impl FareBreakdown {
    /// A breakdown with no discount and no cap: what the fallback produces.
    pub fn flat(fare: Decimal) -> Self {
        Self {
            base_fare: fare,
            discount: Decimal::ZERO,
            final_fare: fare,
            off_peak_applied: false,
            loyalty_applied: false,
            cap_applied: false,
        }
    }

    /// Structural sanity check applied to breakdowns coming over the wire.
    /// A remote engine that returns a negative fare or a final fare above
    /// the base is treated as broken, not trusted.
    pub fn is_well_formed(&self) -> bool {
        self.base_fare >= Decimal::ZERO
            && self.discount >= Decimal::ZERO
            && self.final_fare >= Decimal::ZERO
            && self.final_fare <= self.base_fare
    }
}

/// What the gateway needs to price a trip.
///
/// `trip_count` is the rider's settled-trip history, supplied by the caller.
/// The pricing engine never derives it on its own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PricingRequest {
    #[serde(rename = "userId")]
    pub rider_id: Uuid,
    pub transport_type: TransportMode,
    pub distance_km: Decimal,
    pub trip_count: u64,
    pub requested_at: DateTime<Utc>,
}

/// One trip, from creation to settlement.
///
/// Only `TripOrchestrator` mutates status and fare fields; the store just
/// writes down whatever it is handed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TripRecord {
    pub id: Uuid,
    #[serde(rename = "userId")]
    pub rider_id: Uuid,
    pub transport_type: TransportMode,
    pub distance_km: Decimal,
    /// `None` until the trip has been priced.
    pub base_fare: Option<Decimal>,
    pub final_fare: Option<Decimal>,
    pub status: SettlementStatus,
    pub created_at: DateTime<Utc>,
    /// Stamped when the trip reaches a terminal status.
    pub settled_at: Option<DateTime<Utc>>,
}

impl TripRecord {
    /// A fresh, unpriced, unsaved trip in `Created`.
    pub fn new(
        rider_id: Uuid,
        transport_type: TransportMode,
        distance_km: Decimal,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            rider_id,
            transport_type,
            distance_km,
            base_fare: None,
            final_fare: None,
            status: SettlementStatus::Created,
            created_at,
            settled_at: None,
        }
    }

    pub fn apply_fare(&mut self, breakdown: &FareBreakdown) {
        self.base_fare = Some(breakdown.base_fare);
        self.final_fare = Some(breakdown.final_fare);
    }

    /// Move to a terminal status. Terminal trips stay terminal.
    pub fn settle(&mut self, billed: bool, at: DateTime<Utc>) -> Result<(), SettlementError> {
        if self.status.is_terminal() {
            return Err(SettlementError::InvalidInput(format!(
                "trip {} is already settled as {}",
                self.id, self.status
            )));
        }
        self.status = if billed {
            SettlementStatus::Paid
        } else {
            SettlementStatus::Failed
        };
        self.settled_at = Some(at);
        Ok(())
    }
}

impl fmt::Display for TripRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] rider={} {} {}km fare={} status={}",
            self.id,
            self.rider_id,
            self.transport_type,
            self.distance_km,
            self.final_fare
                .map(|fare| fare.to_string())
                .unwrap_or_else(|| "-".to_string()),
            self.status
        )
    }
}

/// Longest trip anyone can take on the network, with room to spare.
pub const MAX_TRIP_DISTANCE_KM: Decimal = dec!(10000);

/// Validates a requested trip distance: `0 < distance <= MAX_TRIP_DISTANCE_KM`.
pub fn validate_distance(distance_km: Decimal) -> Result<Decimal, SettlementError> {
    if distance_km <= Decimal::ZERO {
        return Err(SettlementError::InvalidInput(format!(
            "distance must be greater than 0, got {distance_km}"
        )));
    }
    if distance_km > MAX_TRIP_DISTANCE_KM {
        return Err(SettlementError::InvalidInput(format!(
            "distance must be at most {MAX_TRIP_DISTANCE_KM} km, got {distance_km}"
        )));
    }
    Ok(distance_km)
}

/// `a × b`, or `InvalidInput` when the product doesn't fit in a `Decimal`.
pub fn checked_money(a: Decimal, b: Decimal) -> Result<Decimal, SettlementError> {
    a.checked_mul(b).ok_or_else(|| {
        SettlementError::InvalidInput(format!("fare overflow computing {a} × {b}"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_round_money_is_half_up() {
        assert_eq!(round_money(dec!(1.005)), dec!(1.01));
        assert_eq!(round_money(dec!(1.004)), dec!(1.00));
        assert_eq!(round_money(dec!(2.675)), dec!(2.68));
    }

    #[test]
    fn test_transport_mode_parsing() {
        assert_eq!("brt".parse::<TransportMode>().unwrap(), TransportMode::Brt);
        assert_eq!(" Ter ".parse::<TransportMode>().unwrap(), TransportMode::Ter);
        assert!(matches!(
            "TAXI".parse::<TransportMode>(),
            Err(SettlementError::InvalidInput(_))
        ));
        for mode in TransportMode::ALL {
            assert_eq!(mode.to_string().parse::<TransportMode>().unwrap(), mode);
        }
    }

    #[test]
    fn test_settle_is_one_way() {
        let mut trip = TripRecord::new(Uuid::new_v4(), TransportMode::Bus, dec!(3), Utc::now());
        assert_eq!(trip.status, SettlementStatus::Created);
        trip.settle(true, Utc::now()).unwrap();
        assert_eq!(trip.status, SettlementStatus::Paid);
        assert!(trip.settled_at.is_some());
        assert!(trip.settle(false, Utc::now()).is_err());
        assert_eq!(trip.status, SettlementStatus::Paid);
    }

    #[test]
    fn test_distance_must_be_positive() {
        assert!(validate_distance(dec!(0.1)).is_ok());
        assert!(validate_distance(dec!(0)).is_err());
        assert!(validate_distance(dec!(-4)).is_err());
    }

    #[test]
    fn test_distance_has_an_upper_bound() {
        assert_eq!(validate_distance(MAX_TRIP_DISTANCE_KM), Ok(MAX_TRIP_DISTANCE_KM));
        assert!(matches!(
            validate_distance(dec!(10000.01)),
            Err(SettlementError::InvalidInput(_))
        ));
        let huge: Decimal = "7922816251426433759354395033".parse().unwrap();
        assert!(matches!(validate_distance(huge), Err(SettlementError::InvalidInput(_))));
    }

    #[test]
    fn test_checked_money_reports_overflow() {
        assert_eq!(checked_money(dec!(100), dec!(12)), Ok(dec!(1200)));
        assert!(matches!(
            checked_money(Decimal::MAX, dec!(2)),
            Err(SettlementError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_trip_json_shape() {
        let trip = TripRecord::new(Uuid::new_v4(), TransportMode::Brt, dec!(12), Utc::now());
        let json = serde_json::to_value(&trip).unwrap();
        assert_eq!(json["transportType"], "BRT");
        assert_eq!(json["status"], "CREATED");
        assert!(json.get("userId").is_some());
        assert!(json["finalFare"].is_null());
    }

    #[test]
    fn test_well_formed_breakdown() {
        assert!(FareBreakdown::flat(dec!(10)).is_well_formed());
        let mut broken = FareBreakdown::flat(dec!(10));
        broken.final_fare = dec!(11);
        assert!(!broken.is_well_formed());
        broken.final_fare = dec!(-1);
        assert!(!broken.is_well_formed());
    }
}
