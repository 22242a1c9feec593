// Fee-, slippage- and tick-aware trade advice for a single top-of-book.
//
// `compute_edge` is pure: no I/O, no state, no errors. Inputs it cannot price
// produce the no-advice result (`NaN` prices, `go = false`).

use tracing::trace;

use super::tick::{round_to_tick, RoundMode};
use super::types::{
    DepthSnapshot, EdgeParameters, EdgeResult, EdgeState, Liquidity, PriceLevel, DEPTH_LEVELS,
};

/// Used when the configured tick is not a positive number.
pub const DEFAULT_SAFE_TICK: f64 = 0.0001;

/// Share of one side's summed top-of-book notional above which a position is flagged.
pub const SIZE_WARNING_SHARE: f64 = 0.25;

// Relative slack on "spread exceeds one tick" so 10.5 - 10.4 still counts as a single tick.
const SPREAD_TICK_SLACK: f64 = 1e-9;

/// Negative or non-finite percentages count as zero.
pub fn sanitize_pct(value: f64) -> f64 {
    if value.is_finite() {
        value.max(0.0)
    } else {
        0.0
    }
}

fn fee_for(leg: Liquidity, maker_fee_pct: f64, taker_fee_pct: f64) -> f64 {
    match leg {
        Liquidity::Maker => maker_fee_pct,
        Liquidity::Taker => taker_fee_pct,
    }
}

pub fn compute_edge(
    bid: f64,
    ask: f64,
    params: &EdgeParameters,
    depth: Option<&DepthSnapshot>,
) -> EdgeResult {
    let maker_fee_pct = sanitize_pct(params.maker_fee_pct);
    let taker_fee_pct = sanitize_pct(params.taker_fee_pct);
    let slippage_pct = sanitize_pct(params.slippage_pct);
    let min_edge_pct = sanitize_pct(params.min_edge_pct);

    let (buy_leg, sell_leg) = params.route_profile.legs();
    let round_trip_fee_pct =
        fee_for(buy_leg, maker_fee_pct, taker_fee_pct) + fee_for(sell_leg, maker_fee_pct, taker_fee_pct);
    let breakeven_pct = round_trip_fee_pct + 2.0 * slippage_pct;

    let usable = |p: f64| p.is_finite() && p > 0.0;
    if !usable(bid) || !usable(ask) || bid > ask {
        trace!(bid, ask, "no advice for top-of-book");
        return EdgeResult::without_advice(breakeven_pct, round_trip_fee_pct, min_edge_pct);
    }

    let tick = if params.tick.is_finite() && params.tick > 0.0 {
        params.tick
    } else {
        DEFAULT_SAFE_TICK
    };

    let spread = ask - bid;
    let (candidate_buy, candidate_sell) = if spread - tick > tick * SPREAD_TICK_SLACK {
        ((bid + tick).min(ask - tick), (ask - tick).max(bid + tick))
    } else {
        (bid, ask)
    };
    let buy_price = round_to_tick(candidate_buy, tick, RoundMode::Down);
    let sell_price = round_to_tick(candidate_sell, tick, RoundMode::Up);

    let notional = if params.position_notional.is_finite() && params.position_notional > 0.0 {
        params.position_notional
    } else {
        0.0
    };

    let (exec_buy_price, exec_sell_price, size_warning) = match depth {
        Some(depth) if notional > 0.0 => {
            let exec_buy = match buy_leg {
                Liquidity::Taker => walk_levels(&depth.asks, notional).unwrap_or(buy_price),
                Liquidity::Maker => buy_price,
            };
            let exec_sell = match sell_leg {
                Liquidity::Taker => walk_levels(&depth.bids, notional).unwrap_or(sell_price),
                Liquidity::Maker => sell_price,
            };
            (exec_buy, exec_sell, size_warning(depth, notional))
        }
        _ => (buy_price, sell_price, None),
    };

    let spread_ratio = if exec_buy_price > 0.0 {
        (exec_sell_price - exec_buy_price) / exec_buy_price
    } else {
        f64::NAN
    };
    let net_edge_ratio = spread_ratio - round_trip_fee_pct / 100.0 - 2.0 * slippage_pct / 100.0;
    let edge_pct = net_edge_ratio * 100.0;
    let pnl = notional * net_edge_ratio;

    let mid = (bid + ask) / 2.0;
    let spread_pct = spread / mid * 100.0;

    let show_advice = buy_price.is_finite() && sell_price.is_finite() && edge_pct.is_finite();
    let edge_state = classify(edge_pct, min_edge_pct);
    let spread_covered = !params.require_spread_cover || spread_pct >= breakeven_pct + min_edge_pct;
    let go = show_advice && edge_state == EdgeState::Positive && spread_covered;

    EdgeResult {
        buy_price,
        sell_price,
        exec_buy_price,
        exec_sell_price,
        edge_pct,
        pnl,
        breakeven_pct,
        round_trip_fee_pct,
        min_edge_pct,
        spread_pct,
        edge_state,
        show_advice,
        go,
        size_warning,
    }
}

fn classify(edge_pct: f64, min_edge_pct: f64) -> EdgeState {
    if !edge_pct.is_finite() {
        EdgeState::Neutral
    } else if edge_pct < 0.0 {
        EdgeState::Negative
    } else if edge_pct >= min_edge_pct {
        EdgeState::Positive
    } else {
        EdgeState::Breakeven
    }
}

/// Volume-weighted price for filling `notional` from the best levels outward.
/// Falls short gracefully: the average covers whatever depth exists. `None` only
/// when nothing at all was consumable.
fn walk_levels(levels: &[PriceLevel], notional: f64) -> Option<f64> {
    let mut remaining = notional;
    let mut spent = 0.0;
    let mut quantity = 0.0;
    for level in levels.iter().filter(|l| l.is_valid()).take(DEPTH_LEVELS) {
        let take = remaining.min(level.notional());
        spent += take;
        quantity += take / level.price;
        remaining -= take;
        if remaining <= 0.0 {
            break;
        }
    }
    (quantity > 0.0).then(|| spent / quantity)
}

fn size_warning(depth: &DepthSnapshot, notional: f64) -> Option<String> {
    let bid_notional = depth.bid_notional();
    let ask_notional = depth.ask_notional();
    let limit = SIZE_WARNING_SHARE * bid_notional.min(ask_notional);
    (notional > limit).then(|| {
        format!(
            "position {:.2} exceeds {:.0}% of top-{} depth (bids {:.2}, asks {:.2})",
            notional,
            SIZE_WARNING_SHARE * 100.0,
            DEPTH_LEVELS,
            bid_notional,
            ask_notional
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::types::RouteProfile;
    use proptest::prelude::*;

    fn zero_fees(tick: f64) -> EdgeParameters {
        EdgeParameters {
            maker_fee_pct: 0.0,
            taker_fee_pct: 0.0,
            slippage_pct: 0.0,
            min_edge_pct: 0.0,
            tick,
            ..EdgeParameters::default()
        }
    }

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    fn depth() -> DepthSnapshot {
        DepthSnapshot::from_levels(
            &[PriceLevel::new(10.0, 20.0), PriceLevel::new(9.9, 10.0)],
            &[PriceLevel::new(10.5, 5.0), PriceLevel::new(10.6, 10.0)],
        )
    }

    #[test]
    fn test_one_tick_inside_the_spread() {
        let params = EdgeParameters { min_edge_pct: 0.25, ..zero_fees(0.1) };
        let r = compute_edge(10.0, 10.5, &params, None);
        assert_eq!(r.buy_price, 10.1);
        assert_eq!(r.sell_price, 10.4);
        assert!(close(r.edge_pct, (10.4 - 10.1) / 10.1 * 100.0));
        assert_eq!(r.edge_state, EdgeState::Positive);
        assert!(r.show_advice);
        assert!(r.go);
        assert!(r.size_warning.is_none());
    }

    #[test]
    fn test_narrow_spreads_stay_inside_the_book() {
        for (bid, ask, tick) in [(100.0, 100.1, 0.1), (1.0, 1.075, 0.05), (0.5025, 0.5075, 0.0025)] {
            let r = compute_edge(bid, ask, &zero_fees(tick), None);
            assert!(r.show_advice, "{bid}/{ask}");
            assert!(r.buy_price >= bid, "{bid}/{ask}: buy {}", r.buy_price);
            assert!(r.sell_price <= ask, "{bid}/{ask}: sell {}", r.sell_price);
            assert!(r.buy_price <= r.sell_price);
        }
    }

    #[test]
    fn test_default_fees() {
        let r = compute_edge(10.0, 10.5, &EdgeParameters { tick: 0.1, ..EdgeParameters::default() }, None);
        assert!(close(r.round_trip_fee_pct, 0.3));
        assert!(close(r.breakeven_pct, 0.4));
        let expected = ((10.4 - 10.1) / 10.1 - 0.003 - 0.001) * 100.0;
        assert!(close(r.edge_pct, expected));
        assert!(close(r.pnl, 250.0 * expected / 100.0));
        assert!(r.go);
    }

    #[test]
    fn test_negative_and_breakeven_states() {
        let r = compute_edge(100.0, 100.1, &EdgeParameters { tick: 0.1, ..EdgeParameters::default() }, None);
        assert_eq!(r.edge_state, EdgeState::Negative);
        assert!(r.show_advice);
        assert!(!r.go);

        let params = EdgeParameters { min_edge_pct: 5.0, ..zero_fees(0.1) };
        let r = compute_edge(10.0, 10.5, &params, None);
        assert_eq!(r.edge_state, EdgeState::Breakeven);
        assert!(!r.go);
    }

    #[test]
    fn test_route_fees() {
        let params = EdgeParameters { route_profile: RouteProfile::MakerTaker, ..EdgeParameters::default() };
        let r = compute_edge(10.0, 10.5, &params, None);
        assert!(close(r.round_trip_fee_pct, 0.4));
        let params = EdgeParameters { route_profile: RouteProfile::TakerTaker, ..EdgeParameters::default() };
        let r = compute_edge(10.0, 10.5, &params, None);
        assert!(close(r.round_trip_fee_pct, 0.5));
        assert!(close(r.breakeven_pct, 0.6));
    }

    #[test]
    fn test_invalid_quotes_keep_fee_figures() {
        let params = EdgeParameters::default();
        for (bid, ask) in [(f64::NAN, 10.0), (10.0, 0.0), (-1.0, 10.0), (10.0, f64::INFINITY), (10.5, 10.0)] {
            let r = compute_edge(bid, ask, &params, None);
            assert!(r.buy_price.is_nan());
            assert!(r.sell_price.is_nan());
            assert!(r.edge_pct.is_nan());
            assert!(r.pnl.is_nan());
            assert_eq!(r.edge_state, EdgeState::Neutral);
            assert!(!r.go);
            assert!(!r.show_advice);
            assert!(close(r.round_trip_fee_pct, 0.3));
            assert!(close(r.breakeven_pct, 0.4));
        }
    }

    #[test]
    fn test_negative_inputs_are_sanitized() {
        let params = EdgeParameters {
            maker_fee_pct: -1.0,
            slippage_pct: f64::NAN,
            tick: -0.1,
            position_notional: -5.0,
            ..EdgeParameters::default()
        };
        let r = compute_edge(10.0, 10.5, &params, None);
        assert_eq!(r.round_trip_fee_pct, 0.0);
        assert_eq!(r.breakeven_pct, 0.0);
        assert_eq!(r.buy_price, 10.0001);
        assert_eq!(r.sell_price, 10.4999);
        assert_eq!(r.pnl, 0.0);
    }

    #[test]
    fn test_taker_legs_walk_depth() {
        let params = EdgeParameters { route_profile: RouteProfile::TakerTaker, position_notional: 100.0, ..zero_fees(0.1) };
        let r = compute_edge(10.0, 10.5, &params, Some(&depth()));
        let expected_buy = 100.0 / (5.0 + 47.5 / 10.6);
        assert!(close(r.exec_buy_price, expected_buy));
        assert!(close(r.exec_sell_price, 10.0));
        assert_eq!(r.buy_price, 10.1);
        assert_eq!(r.sell_price, 10.4);
        assert_eq!(r.edge_state, EdgeState::Negative);
        assert!(!r.go);
        assert!(r.size_warning.is_some());
    }

    #[test]
    fn test_shallow_depth_uses_what_is_there() {
        let params = EdgeParameters { route_profile: RouteProfile::TakerMaker, position_notional: 1000.0, ..zero_fees(0.1) };
        let r = compute_edge(10.0, 10.5, &params, Some(&depth()));
        assert!(close(r.exec_buy_price, 158.5 / 15.0));
        assert_eq!(r.exec_sell_price, r.sell_price);
    }

    #[test]
    fn test_maker_legs_ignore_depth() {
        let params = EdgeParameters { position_notional: 10.0, ..zero_fees(0.1) };
        let r = compute_edge(10.0, 10.5, &params, Some(&depth()));
        assert_eq!(r.exec_buy_price, 10.1);
        assert_eq!(r.exec_sell_price, 10.4);
        assert!(r.size_warning.is_none());
    }

    #[test]
    fn test_empty_depth_side_falls_back_and_warns() {
        let params = EdgeParameters { route_profile: RouteProfile::TakerTaker, ..zero_fees(0.1) };
        let one_sided = DepthSnapshot::from_levels(&[PriceLevel::new(10.0, 100.0)], &[]);
        let r = compute_edge(10.0, 10.5, &params, Some(&one_sided));
        assert_eq!(r.exec_buy_price, r.buy_price);
        assert!(r.size_warning.is_some());
    }

    #[test]
    fn test_spread_cover_gate() {
        let params = EdgeParameters { min_edge_pct: 0.09997, ..zero_fees(0.1) };
        let gated = compute_edge(100.0, 100.1, &params, None);
        assert_eq!(gated.edge_state, EdgeState::Positive);
        assert!(gated.spread_pct < 0.09997);
        assert!(!gated.go);

        let params = EdgeParameters { require_spread_cover: false, ..params };
        assert!(compute_edge(100.0, 100.1, &params, None).go);
    }

    proptest! {
        #[test]
        fn buy_never_above_sell(
            bid in 0.01f64..10_000.0,
            spread in 0.000_001f64..100.0,
            tick in prop::sample::select(vec![0.0001, 0.001, 0.01, 0.05, 0.1, 0.5, 1.0]),
        ) {
            let ask = bid + spread;
            prop_assume!(bid < ask);
            let r = compute_edge(bid, ask, &zero_fees(tick), None);
            prop_assert!(r.buy_price.is_finite() && r.sell_price.is_finite());
            prop_assert!(r.buy_price <= r.sell_price, "buy {} sell {}", r.buy_price, r.sell_price);
        }
    }
}
