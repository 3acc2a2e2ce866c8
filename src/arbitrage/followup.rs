//! Limit Trade Follow-Up
//!
//! After an order placement the raw venue response decides what happens
//! next: how long the (venue, market, coin) is paused, and whether the
//! operator is alerted. The mapping is an ordered rule table so the policy
//! is testable apart from the trading loops.
//!
//! Whatever the outcome, the venue is removed from the pair's working set
//! for the rest of the window once a placement was attempted. Arbitrage
//! margins are small; re-placing a possibly duplicate order on the same pair
//! within the same window risks a loss rather than a gain.

use crate::error::ArbError;
use crate::exchange::{OrderOutcome, OrderSide};
use crate::feedback::Feedback;
use crate::pause::PauseTable;
use crate::persistence::Store;
use crate::utils::float2string;

/// Which raw text a rule inspects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchField {
    Error,
    Payload,
}

#[derive(Debug, Clone, Copy)]
pub struct ClassifierRule {
    pub field: MatchField,
    pub needle: &'static str,
    pub pause_minutes: i64,
    pub alert: bool,
    pub note: &'static str,
}

/// Ordered rules; the first match wins. The needles are the literal
/// fragments the venues have been observed to return.
pub const CLASSIFIER_RULES: &[ClassifierRule] = &[
    ClassifierRule {
        field: MatchField::Error,
        needle: "Timeout was reached",
        pause_minutes: 5,
        alert: true,
        note: "response timeout after placing the order although the order still may have been placed",
    },
    ClassifierRule {
        field: MatchField::Payload,
        needle: "MARKET_OFFLINE",
        pause_minutes: 2880,
        alert: true,
        note: "market offline, pausing this coin at this exchange for two days",
    },
    ClassifierRule {
        field: MatchField::Payload,
        needle: "Unavailable",
        pause_minutes: 60,
        alert: true,
        note: "service unavailable",
    },
    ClassifierRule {
        field: MatchField::Payload,
        needle: "unavailable",
        pause_minutes: 60,
        alert: true,
        note: "service unavailable",
    },
    ClassifierRule {
        field: MatchField::Payload,
        needle: "Insufficient",
        pause_minutes: 60,
        alert: true,
        note: "insufficient funds",
    },
    ClassifierRule {
        field: MatchField::Payload,
        needle: "Invalid arguments:volume",
        pause_minutes: 60,
        alert: true,
        note: "trade volume too low",
    },
    ClassifierRule {
        field: MatchField::Payload,
        needle: "minimum size for",
        pause_minutes: 60,
        alert: true,
        note: "below the venue minimum order size",
    },
    ClassifierRule {
        field: MatchField::Payload,
        needle: "does not exist",
        pause_minutes: 1440,
        alert: true,
        note: "trade pair does not exist, pausing for a day",
    },
    ClassifierRule {
        field: MatchField::Payload,
        needle: "is disabled",
        pause_minutes: 1440,
        alert: true,
        note: "trade pair is disabled, pausing for a day",
    },
    ClassifierRule {
        field: MatchField::Payload,
        needle: "An unknown error occured",
        pause_minutes: 60,
        alert: true,
        note: "unrecognized provider error",
    },
];

/// The classifier's verdict for one placement outcome.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FollowUpAction {
    pub pause_minutes: i64,
    pub alert: bool,
    /// Always true: the venue leaves the working set after any placement.
    pub remove_venue: bool,
    pub note: &'static str,
}

/// Maps a raw placement outcome to pause and alert policy. Pure; applying
/// the verdict to the shared tables happens in [`follow_up_limit_trade`].
pub fn classify_outcome(outcome: &OrderOutcome) -> FollowUpAction {
    // A fulfilled order needs no follow-up beyond the universal removal.
    if outcome.is_fulfilled() {
        return FollowUpAction {
            pause_minutes: 0,
            alert: false,
            remove_venue: true,
            note: "the order has been fulfilled",
        };
    }
    for rule in CLASSIFIER_RULES {
        let haystack = match rule.field {
            MatchField::Error => &outcome.error,
            MatchField::Payload => &outcome.raw_response,
        };
        if haystack.contains(rule.needle) {
            return FollowUpAction {
                pause_minutes: rule.pause_minutes,
                alert: rule.alert,
                remove_venue: true,
                note: rule.note,
            };
        }
    }
    // With an empty order id there is no way to follow the order up, so be
    // conservative and stand back for a few minutes.
    if outcome.order_id.is_empty() {
        return FollowUpAction {
            pause_minutes: 5,
            alert: true,
            remove_venue: true,
            note: "order placement returned no order id",
        };
    }
    // A normal order id with no recognized error: the order rests at the
    // venue and nothing more is known. Deliberately a no-op beyond the
    // universal removal.
    FollowUpAction {
        pause_minutes: 0,
        alert: false,
        remove_venue: true,
        note: "order placed",
    }
}

/// Classifies one placement outcome, writes the pause to the shared table
/// and the store, and narrates everything into the feedback block. Returns
/// the action so the caller can apply the venue removal to its working set.
#[allow(clippy::too_many_arguments)]
pub async fn follow_up_limit_trade(
    feedback: &mut Feedback,
    pauses: &PauseTable,
    store: &dyn Store,
    venue: &str,
    market: &str,
    coin: &str,
    side: OrderSide,
    quantity: f64,
    rate: f64,
    outcome: &OrderOutcome,
) -> Result<FollowUpAction, ArbError> {
    feedback.add(format!(
        "Follow-up on {} {} {} @ {} at rate {} on {} error {} JSON {} order id {}",
        side,
        float2string(quantity),
        coin,
        market,
        float2string(rate),
        venue,
        outcome.error,
        outcome.raw_response,
        outcome.order_id
    ));

    let action = classify_outcome(outcome);
    feedback.add(action.note.to_string());
    if action.alert {
        feedback.escalate();
    }

    if action.pause_minutes > 0 {
        let reason = format!("{} {}", outcome.error, outcome.raw_response);
        let entry = pauses.pause_for_minutes(venue, market, coin, action.pause_minutes, &reason);
        let key = (venue.to_string(), market.to_string(), coin.to_string());
        store.store_pause_entry(&key, &entry).await?;
        feedback.add(format!(
            "Trading {} @ {} @ {} was disabled for {} minutes",
            coin, market, venue, action.pause_minutes
        ));
    }

    Ok(action)
}
