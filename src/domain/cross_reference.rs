use std::collections::{BTreeSet, HashMap};

use serde::Serialize;

use super::models::{Command, LogEvent};

/// How far back a session looks for the transaction that started it.
pub const BACKWARD_SEARCH_LIMIT: usize = 200;
/// Last-resort look-back for sessions that charged but found no id.
pub const WIDENED_SEARCH_LIMIT: usize = 500;

/// Which tier of the search produced a session's transaction id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransactionIdSource {
    ForwardStartOnConnector,
    ForwardStart,
    ForwardStop,
    ForwardAny,
    BackwardStartResponse,
    BackwardStartRequest,
    BackwardOpen,
    WidenedBackward,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTransaction {
    pub id: String,
    pub source: TransactionIdSource,
}

/// Stream positions bounding one candidate session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchWindow {
    pub start: usize,
    /// Exclusive end: the next session start or the stream length.
    pub end: usize,
    pub previous_start: Option<usize>,
    pub reached_charging: bool,
}

/// Transaction ids already claimed by earlier sessions on the same connector.
#[derive(Debug, Clone, Default)]
pub struct AssignedTransactions(BTreeSet<String>);

impl AssignedTransactions {
    pub fn contains(&self, transaction_id: &str) -> bool {
        self.0.contains(transaction_id)
    }

    pub fn record(&mut self, transaction_id: &str) {
        self.0.insert(transaction_id.to_string());
    }
}

/// Fills in missing connector ids before events are frozen.
///
/// A `StartTransactionResponse` first inherits the connector of the request
/// with the same message id; afterwards any event still lacking one inherits
/// the connector first seen for its transaction id. Returns the number of
/// events updated.
pub fn backfill_connector_ids(events: &mut [LogEvent]) -> usize {
    let mut request_connectors: HashMap<String, u32> = HashMap::new();
    for event in events.iter() {
        if event.command == Command::StartTransactionRequest
            && let (Some(connector_id), Some(message_id)) = (event.connector_id, &event.message_id)
        {
            request_connectors
                .entry(message_id.clone())
                .or_insert(connector_id);
        }
    }

    let mut filled = 0;
    for event in events
        .iter_mut()
        .filter(|event| event.connector_id.is_none() && event.command == Command::StartTransactionResponse)
    {
        let inherited = event
            .message_id
            .as_ref()
            .and_then(|message_id| request_connectors.get(message_id));
        if let Some(&connector_id) = inherited {
            event.connector_id = Some(connector_id);
            filled += 1;
        }
    }

    let mut transaction_connectors: HashMap<String, u32> = HashMap::new();
    for event in events.iter() {
        if let (Some(connector_id), Some(transaction_id)) = (event.connector_id, &event.transaction_id) {
            transaction_connectors
                .entry(transaction_id.clone())
                .or_insert(connector_id);
        }
    }

    for event in events.iter_mut().filter(|event| event.connector_id.is_none()) {
        let inherited = event
            .transaction_id
            .as_ref()
            .and_then(|transaction_id| transaction_connectors.get(transaction_id));
        if let Some(&connector_id) = inherited {
            event.connector_id = Some(connector_id);
            filled += 1;
        }
    }

    filled
}

/// Resolves the transaction id for the session starting at `window.start`.
///
/// Forward tiers search the session's own boundary, backward tiers search a
/// bounded look-back clipped at the previous session start, and the widened
/// tier only runs for sessions that reached charging. Ids in `assigned` are
/// never handed out twice.
pub fn resolve_transaction_id(
    stream: &[&LogEvent],
    connector_id: u32,
    window: &SearchWindow,
    assigned: &AssignedTransactions,
) -> Option<ResolvedTransaction> {
    let forward = &stream[window.start..window.end.min(stream.len())];
    let on_connector = |event: &LogEvent| event.connector_id == Some(connector_id);

    let forward_tiers: [(TransactionIdSource, &dyn Fn(&LogEvent) -> bool); 4] = [
        (TransactionIdSource::ForwardStartOnConnector, &|event: &LogEvent| {
            event.command.is_start_transaction() && on_connector(event)
        }),
        (TransactionIdSource::ForwardStart, &|event: &LogEvent| {
            event.command.is_start_transaction()
        }),
        (TransactionIdSource::ForwardStop, &|event: &LogEvent| {
            event.command == Command::StopTransactionRequest
        }),
        (TransactionIdSource::ForwardAny, &|_: &LogEvent| true),
    ];
    for (source, predicate) in forward_tiers {
        if let Some(id) = first_match(forward, assigned, predicate) {
            return Some(ResolvedTransaction { id, source });
        }
    }

    let floor = window
        .start
        .saturating_sub(BACKWARD_SEARCH_LIMIT)
        .max(window.previous_start.unwrap_or(0));
    let backward = &stream[floor..window.start];

    let backward_tiers: [(TransactionIdSource, &dyn Fn(&LogEvent) -> bool); 3] = [
        (TransactionIdSource::BackwardStartResponse, &|event: &LogEvent| {
            event.command == Command::StartTransactionResponse && on_connector(event)
        }),
        (TransactionIdSource::BackwardStartResponse, &|event: &LogEvent| {
            event.command == Command::StartTransactionResponse
        }),
        (TransactionIdSource::BackwardStartRequest, &|event: &LogEvent| {
            event.command == Command::StartTransactionRequest && on_connector(event)
        }),
    ];
    for (source, predicate) in backward_tiers {
        if let Some(id) = last_match(backward, assigned, predicate) {
            return Some(ResolvedTransaction { id, source });
        }
    }

    if let Some(id) = last_match(backward, assigned, |_| true) {
        let closed = backward
            .iter()
            .any(|event| event.command.is_stop_transaction() && event.transaction_id.as_deref() == Some(id.as_str()));
        if !closed {
            return Some(ResolvedTransaction {
                id,
                source: TransactionIdSource::BackwardOpen,
            });
        }
    }

    if window.reached_charging {
        let widened = &stream[window.start.saturating_sub(WIDENED_SEARCH_LIMIT)..window.start];
        if let Some(id) = last_match(widened, assigned, on_connector) {
            return Some(ResolvedTransaction {
                id,
                source: TransactionIdSource::WidenedBackward,
            });
        }
    }

    None
}

fn first_match(
    events: &[&LogEvent],
    assigned: &AssignedTransactions,
    predicate: impl Fn(&LogEvent) -> bool,
) -> Option<String> {
    events
        .iter()
        .find_map(|event| unassigned_id(event, assigned, &predicate))
}

fn last_match(
    events: &[&LogEvent],
    assigned: &AssignedTransactions,
    predicate: impl Fn(&LogEvent) -> bool,
) -> Option<String> {
    events
        .iter()
        .rev()
        .find_map(|event| unassigned_id(event, assigned, &predicate))
}

fn unassigned_id(
    event: &LogEvent,
    assigned: &AssignedTransactions,
    predicate: &impl Fn(&LogEvent) -> bool,
) -> Option<String> {
    if !predicate(event) {
        return None;
    }
    let transaction_id = event.transaction_id.as_deref()?;
    (!assigned.contains(transaction_id)).then(|| transaction_id.to_string())
}
