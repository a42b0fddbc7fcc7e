// =============================================================================
// pricing_engine.rs — THE FARE CALCULATOR
// =============================================================================
//
// A pure function of (mode, distance, time, rider history) -> fare. No I/O,
// no shared state beyond the immutable rule set. The same engine runs
// in-process behind the gateway or behind POST /pricing/calculate when
// pricing is deployed as its own service.
//
// The rules, in order:
//   1. base = rate × distance, rounded to cents (half-up)
//   2. off-peak:  discount += round(base × off_peak_rate)
//   3. loyalty:   discount += round(base × loyalty_rate)
//   4. final = max(0, base − discount)
//   5. final = min(final, cap) when the cap is enforced
//
// Both discounts are taken off the BASE fare and rounded individually,
// so rounding error adds up across terms. That is intentional and pinned
// by the tests below.
// =============================================================================

use chrono::{DateTime, Timelike, Utc};
use rust_decimal::Decimal;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::FareRules;
use crate::error::{SettlementError, SettlementResult};
use crate::models::{checked_money, round_money, validate_distance, FareBreakdown, PricingRequest, TransportMode};

pub struct PricingEngine {
    rules: FareRules,
}

impl PricingEngine {
    pub fn new(rules: FareRules) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &FareRules {
        &self.rules
    }

    /// Price a trip.
    ///
    /// `trip_count` is the rider's trip history. The loyalty discount kicks
    /// in only when it is strictly greater than the configured minimum.
    pub fn compute_fare(
        &self,
        mode: TransportMode,
        distance_km: Decimal,
        request_time: DateTime<Utc>,
        trip_count: u64,
    ) -> SettlementResult<FareBreakdown> {
        let distance_km = validate_distance(distance_km)?;
        let rules = &self.rules;

        let base_fare = round_money(checked_money(rules.base_rate_per_km, distance_km)?);
        debug!(
            mode = %mode,
            distance_km = %distance_km,
            rate = %rules.base_rate_per_km,
            base_fare = %base_fare,
            "Base fare computed"
        );

        let mut discount = Decimal::ZERO;
        let mut off_peak_applied = false;
        let mut loyalty_applied = false;
        let mut cap_applied = false;

        let local_hour = request_time.with_timezone(&rules.utc_offset).hour();
        if rules.off_peak_enabled && self.is_off_peak(local_hour) {
            let term = round_money(checked_money(base_fare, rules.off_peak_rate)?);
            discount = add_discount(discount, term)?;
            off_peak_applied = true;
            debug!(hour = local_hour, discount = %term, "Off-peak discount applied");
        }

        if rules.loyalty_enabled && trip_count > rules.loyalty_min_trips {
            let term = round_money(checked_money(base_fare, rules.loyalty_rate)?);
            discount = add_discount(discount, term)?;
            loyalty_applied = true;
            debug!(trip_count, discount = %term, "Loyalty discount applied");
        }

        let mut final_fare = (base_fare - discount).max(Decimal::ZERO);

        if rules.daily_cap_enabled && final_fare > rules.daily_cap {
            final_fare = rules.daily_cap;
            cap_applied = true;
            debug!(cap = %rules.daily_cap, "Daily cap applied");
        }

        Ok(FareBreakdown {
            base_fare,
            discount,
            final_fare,
            off_peak_applied,
            loyalty_applied,
            cap_applied,
        })
    }

    /// Convenience wrapper used by the pricing endpoint and the local backend.
    pub fn quote(&self, request: &PricingRequest) -> SettlementResult<FareBreakdown> {
        let breakdown = self.compute_fare(
            request.transport_type,
            request.distance_km,
            request.requested_at,
            request.trip_count,
        )?;
        log_quote(request.rider_id, request.transport_type, &breakdown);
        Ok(breakdown)
    }

    /// Off-peak membership for a local hour. A window with `start > end`
    /// wraps midnight; `start == end` is an empty window.
    pub fn is_off_peak(&self, hour: u32) -> bool {
        let start = self.rules.off_peak_start_hour;
        let end = self.rules.off_peak_end_hour;
        if start > end {
            hour >= start || hour < end
        } else {
            start <= hour && hour < end
        }
    }
}

fn add_discount(total: Decimal, term: Decimal) -> SettlementResult<Decimal> {
    total
        .checked_add(term)
        .ok_or_else(|| SettlementError::InvalidInput(format!("discount overflow adding {term}")))
}

fn log_quote(rider_id: Uuid, mode: TransportMode, breakdown: &FareBreakdown) {
    info!(
        rider_id = %rider_id,
        mode = %mode,
        base = %breakdown.base_fare,
        discount = %breakdown.discount,
        final_fare = %breakdown.final_fare,
        off_peak = breakdown.off_peak_applied,
        loyalty = breakdown.loyalty_applied,
        cap = breakdown.cap_applied,
        "Fare computed"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn plain_rules() -> FareRules {
        FareRules {
            base_rate_per_km: dec!(100),
            off_peak_enabled: false,
            loyalty_enabled: false,
            daily_cap_enabled: true,
            daily_cap: dec!(3000),
            ..FareRules::default()
        }
    }

    fn at_hour(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 12, hour, 15, 0).unwrap()
    }

    #[test]
    fn test_plain_brt_trip() {
        let engine = PricingEngine::new(plain_rules());
        let fare = engine
            .compute_fare(TransportMode::Brt, dec!(12), at_hour(10), 0)
            .unwrap();
        assert_eq!(fare.base_fare, dec!(1200.00));
        assert_eq!(fare.discount, dec!(0));
        assert_eq!(fare.final_fare, dec!(1200.00));
        assert!(!fare.off_peak_applied && !fare.loyalty_applied && !fare.cap_applied);
    }

    #[test]
    fn test_off_peak_trip() {
        let engine = PricingEngine::new(FareRules {
            off_peak_enabled: true,
            off_peak_rate: dec!(0.10),
            ..plain_rules()
        });
        let fare = engine
            .compute_fare(TransportMode::Brt, dec!(12), at_hour(22), 0)
            .unwrap();
        assert_eq!(fare.discount, dec!(120.00));
        assert_eq!(fare.final_fare, dec!(1080.00));
        assert!(fare.off_peak_applied);
        assert!(!fare.loyalty_applied);
    }

    #[test]
    fn test_cap_clamps_long_trip() {
        let engine = PricingEngine::new(plain_rules());
        let fare = engine
            .compute_fare(TransportMode::Ter, dec!(50), at_hour(10), 0)
            .unwrap();
        assert_eq!(fare.base_fare, dec!(5000.00));
        assert_eq!(fare.final_fare, dec!(3000));
        assert!(fare.cap_applied);
    }

    #[test]
    fn test_off_peak_window_wraps_midnight() {
        let engine = PricingEngine::new(FareRules::default());
        for hour in [20, 23, 0, 5] {
            assert!(engine.is_off_peak(hour), "hour {hour} should be off-peak");
        }
        for hour in 6..=19 {
            assert!(!engine.is_off_peak(hour), "hour {hour} should be peak");
        }
    }

    #[test]
    fn test_non_wrapping_window_and_empty_window() {
        let engine = PricingEngine::new(FareRules {
            off_peak_start_hour: 10,
            off_peak_end_hour: 14,
            ..FareRules::default()
        });
        assert!(!engine.is_off_peak(9));
        assert!(engine.is_off_peak(10));
        assert!(engine.is_off_peak(13));
        assert!(!engine.is_off_peak(14));

        let empty = PricingEngine::new(FareRules {
            off_peak_start_hour: 7,
            off_peak_end_hour: 7,
            ..FareRules::default()
        });
        assert!((0..24).all(|h| !empty.is_off_peak(h)));
    }

    #[test]
    fn test_off_peak_uses_local_offset() {
        // 18:15 UTC is 20:15 at UTC+2.
        let engine = PricingEngine::new(FareRules {
            off_peak_enabled: true,
            utc_offset: chrono::FixedOffset::east_opt(2 * 3600).unwrap(),
            ..plain_rules()
        });
        let fare = engine
            .compute_fare(TransportMode::Bus, dec!(1), at_hour(18), 0)
            .unwrap();
        assert!(fare.off_peak_applied);
    }

    #[test]
    fn test_loyalty_threshold_is_strict() {
        let engine = PricingEngine::new(FareRules {
            loyalty_enabled: true,
            loyalty_rate: dec!(0.05),
            loyalty_min_trips: 10,
            ..plain_rules()
        });
        let at_min = engine
            .compute_fare(TransportMode::Bus, dec!(10), at_hour(10), 10)
            .unwrap();
        assert!(!at_min.loyalty_applied);
        assert_eq!(at_min.final_fare, dec!(1000.00));

        let above = engine
            .compute_fare(TransportMode::Bus, dec!(10), at_hour(10), 11)
            .unwrap();
        assert!(above.loyalty_applied);
        assert_eq!(above.discount, dec!(50.00));
        assert_eq!(above.final_fare, dec!(950.00));
    }

    #[test]
    fn test_discounts_are_additive_not_compounded() {
        let engine = PricingEngine::new(FareRules {
            off_peak_enabled: true,
            off_peak_rate: dec!(0.10),
            loyalty_enabled: true,
            loyalty_rate: dec!(0.05),
            loyalty_min_trips: 10,
            ..plain_rules()
        });
        let fare = engine
            .compute_fare(TransportMode::Brt, dec!(12), at_hour(23), 25)
            .unwrap();
        // 120 + 60 off the base, not 120 then 5% of 1080.
        assert_eq!(fare.discount, dec!(180.00));
        assert_eq!(fare.final_fare, dec!(1020.00));
        assert!(fare.off_peak_applied && fare.loyalty_applied);
    }

    #[test]
    fn test_each_discount_term_is_rounded() {
        // base = 0.05 * 1.5 -> 0.075 -> 0.08
        // off-peak 0.08 * 0.5625 = 0.045 -> 0.05
        // loyalty  0.08 * 0.0625 = 0.005 -> 0.01
        // Rounding only the sum (0.05) would give 0.05, per-term gives 0.06.
        let engine = PricingEngine::new(FareRules {
            base_rate_per_km: dec!(0.05),
            off_peak_enabled: true,
            off_peak_rate: dec!(0.5625),
            loyalty_enabled: true,
            loyalty_rate: dec!(0.0625),
            loyalty_min_trips: 0,
            daily_cap_enabled: false,
            ..FareRules::default()
        });
        let fare = engine
            .compute_fare(TransportMode::Bus, dec!(1.5), at_hour(21), 1)
            .unwrap();
        assert_eq!(fare.base_fare, dec!(0.08));
        assert_eq!(fare.discount, dec!(0.06));
        assert_eq!(fare.final_fare, dec!(0.02));
    }

    #[test]
    fn test_final_never_negative() {
        let engine = PricingEngine::new(FareRules {
            off_peak_enabled: true,
            off_peak_rate: dec!(0.8),
            loyalty_enabled: true,
            loyalty_rate: dec!(0.7),
            loyalty_min_trips: 0,
            ..plain_rules()
        });
        let fare = engine
            .compute_fare(TransportMode::Bus, dec!(2), at_hour(21), 5)
            .unwrap();
        assert_eq!(fare.final_fare, dec!(0));
        assert!(fare.discount > fare.base_fare);
    }

    #[test]
    fn test_cap_holds_regardless_of_discounts() {
        let engine = PricingEngine::new(FareRules {
            off_peak_enabled: true,
            loyalty_enabled: true,
            loyalty_min_trips: 0,
            ..plain_rules()
        });
        for distance in [dec!(1), dec!(29.9), dec!(33.4), dec!(80), dec!(400.25)] {
            for hour in [3, 12, 21] {
                for trips in [0, 1, 50] {
                    let fare = engine
                        .compute_fare(TransportMode::Ter, distance, at_hour(hour), trips)
                        .unwrap();
                    let uncapped = (fare.base_fare - fare.discount).max(Decimal::ZERO);
                    assert!(fare.final_fare <= dec!(3000));
                    assert_eq!(fare.final_fare, uncapped.min(dec!(3000)));
                    assert_eq!(fare.cap_applied, uncapped > dec!(3000));
                }
            }
        }
    }

    #[test]
    fn test_cap_disabled_lets_fare_through() {
        let engine = PricingEngine::new(FareRules {
            daily_cap_enabled: false,
            ..plain_rules()
        });
        let fare = engine
            .compute_fare(TransportMode::Ter, dec!(50), at_hour(10), 0)
            .unwrap();
        assert_eq!(fare.final_fare, dec!(5000.00));
        assert!(!fare.cap_applied);
    }

    #[test]
    fn test_non_positive_distance_rejected() {
        let engine = PricingEngine::new(plain_rules());
        for distance in [dec!(0), dec!(-1)] {
            assert!(matches!(
                engine.compute_fare(TransportMode::Bus, distance, at_hour(10), 0),
                Err(SettlementError::InvalidInput(_))
            ));
        }
    }

    #[test]
    fn test_absurd_distance_is_rejected_not_panicking() {
        let engine = PricingEngine::new(FareRules::default());
        let huge: Decimal = "7922816251426433759354395033".parse().unwrap();
        assert!(matches!(
            engine.compute_fare(TransportMode::Bus, huge, at_hour(22), 0),
            Err(SettlementError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_overflowing_rate_is_invalid_input() {
        let engine = PricingEngine::new(FareRules {
            base_rate_per_km: Decimal::MAX,
            ..plain_rules()
        });
        assert!(matches!(
            engine.compute_fare(TransportMode::Ter, dec!(2), at_hour(10), 0),
            Err(SettlementError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_base_fare_rounds_half_up() {
        let engine = PricingEngine::new(FareRules {
            base_rate_per_km: dec!(0.5),
            ..plain_rules()
        });
        let fare = engine
            .compute_fare(TransportMode::Bus, dec!(0.01), at_hour(10), 0)
            .unwrap();
        assert_eq!(fare.base_fare, dec!(0.01));
    }
}
