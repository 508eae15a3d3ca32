//! Typed transaction model and the parse boundary from indexer JSON
//!
//! Mintscan search results and chain REST `tx_response` objects share the Cosmos SDK
//! `TxResponse` shape. Everything past this module works with [`RawTransaction`];
//! entries that cannot be parsed are kept as reasons in `malformed` so the
//! normalizer can surface them as warnings without dropping the whole transaction.

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::error::{HistoryError, HistoryResult};

// =============================================================================
// Typed model
// =============================================================================

/// A coin amount in base units
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Coin {
    pub denom: String,
    pub amount: u128,
}

/// Fee paid for a transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fee {
    pub payer: Option<String>,
    pub coins: Vec<Coin>,
}

/// A single bank transfer emitted by a message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Movement {
    pub msg_index: Option<u32>,
    pub sender: String,
    pub receiver: String,
    pub denom: String,
    pub amount: u128,
}

/// An ICS-20 transfer (outgoing MsgTransfer or received packet)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IbcTransfer {
    pub sender: String,
    pub receiver: String,
    pub denom: String,
    pub amount: u128,
}

/// One indexer record after the parse boundary
#[derive(Debug, Clone)]
pub struct RawTransaction {
    pub id: String,
    pub height: u64,
    pub timestamp: DateTime<Utc>,
    pub failed: bool,
    pub fee: Option<Fee>,
    pub msg_types: Vec<String>,
    pub movements: Vec<Movement>,
    pub ibc_transfers: Vec<IbcTransfer>,
    /// Reasons for entries that were skipped while parsing
    pub malformed: Vec<String>,
}

// =============================================================================
// Wire format
// =============================================================================

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum StrOrNum {
    Str(String),
    Num(u64),
}

fn de_lenient_u64<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    match StrOrNum::deserialize(deserializer)? {
        StrOrNum::Num(n) => Ok(n),
        StrOrNum::Str(s) => s.parse().map_err(serde::de::Error::custom),
    }
}

/// Mintscan search result element
#[derive(Debug, Deserialize)]
struct MintscanTxElem {
    #[serde(default)]
    header: MintscanHeader,
    data: TxResponse,
}

#[derive(Debug, Default, Deserialize)]
struct MintscanHeader {
    #[serde(default)]
    timestamp: Option<String>,
}

/// `GET /cosmos/tx/v1beta1/txs/{hash}` body
#[derive(Debug, Deserialize)]
struct LcdTxEnvelope {
    tx_response: TxResponse,
}

/// Cosmos SDK `TxResponse`
#[derive(Debug, Deserialize)]
pub struct TxResponse {
    pub txhash: String,
    #[serde(default, deserialize_with = "de_lenient_u64")]
    pub height: u64,
    #[serde(default)]
    pub code: u32,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    tx: Option<TxJson>,
    #[serde(default)]
    logs: Vec<TxLog>,
    #[serde(default)]
    events: Vec<Event>,
}

#[derive(Debug, Default, Deserialize)]
struct TxJson {
    #[serde(default)]
    body: TxBody,
    #[serde(default)]
    auth_info: AuthInfo,
}

#[derive(Debug, Default, Deserialize)]
struct TxBody {
    #[serde(default)]
    messages: Vec<MessageJson>,
}

#[derive(Debug, Default, Deserialize)]
struct MessageJson {
    #[serde(rename = "@type", default)]
    type_url: String,
    #[serde(default)]
    sender: Option<String>,
    #[serde(default)]
    from_address: Option<String>,
    #[serde(default)]
    delegator_address: Option<String>,
    #[serde(default)]
    voter: Option<String>,
    #[serde(default)]
    signer: Option<String>,
    #[serde(default)]
    grantee: Option<String>,
    #[serde(default)]
    receiver: Option<String>,
    #[serde(default)]
    token: Option<CoinJson>,
}

impl MessageJson {
    fn signer(&self) -> Option<&str> {
        [
            &self.sender,
            &self.from_address,
            &self.delegator_address,
            &self.voter,
            &self.signer,
            &self.grantee,
        ]
        .into_iter()
        .find_map(|a| a.as_deref())
    }
}

#[derive(Debug, Default, Deserialize)]
struct AuthInfo {
    #[serde(default)]
    fee: FeeJson,
}

#[derive(Debug, Default, Deserialize)]
struct FeeJson {
    #[serde(default)]
    amount: Vec<CoinJson>,
    #[serde(default)]
    payer: String,
}

#[derive(Debug, Deserialize)]
struct CoinJson {
    denom: String,
    amount: String,
}

#[derive(Debug, Deserialize)]
struct TxLog {
    #[serde(default)]
    msg_index: Option<u32>,
    #[serde(default)]
    events: Vec<Event>,
}

#[derive(Debug, Deserialize)]
struct Event {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    attributes: Vec<Attribute>,
}

#[derive(Debug, Deserialize)]
struct Attribute {
    key: String,
    #[serde(default)]
    value: Option<String>,
}

impl Event {
    fn values<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.attributes
            .iter()
            .filter(move |a| a.key == key)
            .map(|a| a.value.as_deref().unwrap_or(""))
    }

    fn value<'a>(&'a self, key: &'a str) -> Option<&'a str> {
        self.values(key).next()
    }
}

const MSG_TRANSFER: &str = "/ibc.applications.transfer.v1.MsgTransfer";

// =============================================================================
// Parsing
// =============================================================================

/// Parse one element of a Mintscan transaction search page
pub fn parse_mintscan_elem(value: serde_json::Value) -> HistoryResult<RawTransaction> {
    let id_hint = value
        .pointer("/data/txhash")
        .and_then(|v| v.as_str())
        .unwrap_or("unknown")
        .to_string();

    let elem: MintscanTxElem = serde_json::from_value(value).map_err(|e| HistoryError::MalformedTransaction {
        tx_id: id_hint,
        reason: e.to_string(),
    })?;

    parse_tx_response(elem.data, elem.header.timestamp.as_deref())
}

/// Parse a chain REST `GET /cosmos/tx/v1beta1/txs/{hash}` body
pub fn parse_lcd_tx(value: serde_json::Value) -> HistoryResult<RawTransaction> {
    let id_hint = value
        .pointer("/tx_response/txhash")
        .and_then(|v| v.as_str())
        .unwrap_or("unknown")
        .to_string();

    let envelope: LcdTxEnvelope = serde_json::from_value(value).map_err(|e| HistoryError::MalformedTransaction {
        tx_id: id_hint,
        reason: e.to_string(),
    })?;

    parse_tx_response(envelope.tx_response, None)
}

/// Convert a `TxResponse` into the typed model
pub fn parse_tx_response(resp: TxResponse, fallback_timestamp: Option<&str>) -> HistoryResult<RawTransaction> {
    let malformed_tx = |reason: String| HistoryError::MalformedTransaction {
        tx_id: resp.txhash.clone(),
        reason,
    };

    if resp.txhash.is_empty() {
        return Err(malformed_tx("missing txhash".to_string()));
    }

    let raw_ts = resp
        .timestamp
        .as_deref()
        .filter(|s| !s.is_empty())
        .or(fallback_timestamp)
        .ok_or_else(|| malformed_tx("missing timestamp".to_string()))?;
    let timestamp = DateTime::parse_from_rfc3339(raw_ts)
        .map_err(|e| malformed_tx(format!("bad timestamp '{}': {}", raw_ts, e)))?
        .with_timezone(&Utc);

    let tx = resp.tx.unwrap_or_default();
    let mut malformed = Vec::new();

    let msg_types = tx.body.messages.iter().map(|m| m.type_url.clone()).collect();
    let fee = parse_fee(&tx, &resp.events, &mut malformed);
    let movements = extract_movements(&resp.logs, &resp.events, &mut malformed);
    let ibc_transfers = extract_ibc_transfers(&tx.body.messages, &resp.logs, &resp.events, &mut malformed);

    Ok(RawTransaction {
        id: resp.txhash,
        height: resp.height,
        timestamp,
        failed: resp.code != 0,
        fee,
        msg_types,
        movements,
        ibc_transfers,
        malformed,
    })
}

/// Parse a coins string such as `"1000uatom,5ibc/27394F..."`.
/// An empty string is zero coins.
pub fn parse_coins(s: &str) -> Result<Vec<Coin>, String> {
    s.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(parse_coin)
        .collect()
}

fn parse_coin(s: &str) -> Result<Coin, String> {
    let split = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    let (digits, denom) = s.split_at(split);
    if digits.is_empty() || denom.is_empty() {
        return Err(format!("invalid coin '{}'", s));
    }
    let amount = digits
        .parse::<u128>()
        .map_err(|e| format!("invalid amount in '{}': {}", s, e))?;
    Ok(Coin {
        denom: denom.to_string(),
        amount,
    })
}

fn coin_from_json(coin: &CoinJson) -> Result<Coin, String> {
    let amount = coin
        .amount
        .parse::<u128>()
        .map_err(|e| format!("invalid amount '{}' for {}: {}", coin.amount, coin.denom, e))?;
    Ok(Coin {
        denom: coin.denom.clone(),
        amount,
    })
}

fn parse_fee(tx: &TxJson, events: &[Event], malformed: &mut Vec<String>) -> Option<Fee> {
    let mut coins = Vec::new();
    for coin in &tx.auth_info.fee.amount {
        match coin_from_json(coin) {
            Ok(c) => coins.push(c),
            Err(reason) => malformed.push(format!("fee: {}", reason)),
        }
    }
    if coins.is_empty() {
        return None;
    }

    // Payer: `tx` event, then the explicit fee payer, then the first signer
    let payer = events
        .iter()
        .filter(|e| e.kind == "tx")
        .find_map(|e| e.value("fee_payer"))
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .or_else(|| Some(tx.auth_info.fee.payer.clone()).filter(|p| !p.is_empty()))
        .or_else(|| tx.body.messages.first().and_then(|m| m.signer()).map(str::to_string));

    Some(Fee { payer, coins })
}

fn extract_movements(logs: &[TxLog], events: &[Event], malformed: &mut Vec<String>) -> Vec<Movement> {
    let mut movements = Vec::new();

    if !logs.is_empty() {
        for (position, log) in logs.iter().enumerate() {
            let msg_index = log.msg_index.or(u32::try_from(position).ok());
            for event in log.events.iter().filter(|e| e.kind == "transfer") {
                push_transfers(event, msg_index, &mut movements, malformed);
            }
        }
        return movements;
    }

    // SDK 0.50+: logs are empty; message transfers carry a msg_index attribute.
    // Transfers without one belong to the ante handler (fee deduction).
    for event in events.iter().filter(|e| e.kind == "transfer") {
        let Some(index) = event.value("msg_index") else {
            continue;
        };
        let msg_index = index.parse::<u32>().ok();
        push_transfers(event, msg_index, &mut movements, malformed);
    }

    movements
}

/// A transfer event may hold several recipient/sender/amount triples
fn push_transfers(event: &Event, msg_index: Option<u32>, out: &mut Vec<Movement>, malformed: &mut Vec<String>) {
    let recipients: Vec<&str> = event.values("recipient").collect();
    let senders: Vec<&str> = event.values("sender").collect();
    let amounts: Vec<&str> = event.values("amount").collect();

    if recipients.len() != senders.len() || recipients.len() != amounts.len() {
        malformed.push(format!(
            "transfer event with {} recipients, {} senders, {} amounts",
            recipients.len(),
            senders.len(),
            amounts.len()
        ));
        return;
    }

    for ((receiver, sender), amount) in recipients.into_iter().zip(senders).zip(amounts) {
        if receiver.is_empty() || sender.is_empty() {
            malformed.push("transfer without sender or recipient".to_string());
            continue;
        }
        match parse_coins(amount) {
            Ok(coins) => {
                for coin in coins {
                    out.push(Movement {
                        msg_index,
                        sender: sender.to_string(),
                        receiver: receiver.to_string(),
                        denom: coin.denom,
                        amount: coin.amount,
                    });
                }
            }
            Err(reason) => malformed.push(format!("transfer: {}", reason)),
        }
    }
}

fn extract_ibc_transfers(
    messages: &[MessageJson],
    logs: &[TxLog],
    events: &[Event],
    malformed: &mut Vec<String>,
) -> Vec<IbcTransfer> {
    let mut transfers: Vec<IbcTransfer> = Vec::new();
    let mut push = |t: IbcTransfer| {
        if !transfers.contains(&t) {
            transfers.push(t);
        }
    };

    // Outgoing
    for msg in messages.iter().filter(|m| m.type_url == MSG_TRANSFER) {
        let (Some(sender), Some(receiver), Some(token)) = (&msg.sender, &msg.receiver, &msg.token) else {
            malformed.push("MsgTransfer without sender, receiver or token".to_string());
            continue;
        };
        match coin_from_json(token) {
            Ok(coin) => push(IbcTransfer {
                sender: sender.clone(),
                receiver: receiver.clone(),
                denom: coin.denom,
                amount: coin.amount,
            }),
            Err(reason) => malformed.push(format!("MsgTransfer: {}", reason)),
        }
    }

    // Incoming packets (and acknowledgements, deduplicated above)
    let all_events = logs.iter().flat_map(|l| l.events.iter()).chain(events.iter());
    for event in all_events.filter(|e| e.kind == "fungible_token_packet") {
        let (Some(sender), Some(receiver), Some(denom), Some(amount)) = (
            event.value("sender"),
            event.value("receiver"),
            event.value("denom"),
            event.value("amount"),
        ) else {
            continue;
        };
        match amount.parse::<u128>() {
            Ok(amount) => push(IbcTransfer {
                sender: sender.to_string(),
                receiver: receiver.to_string(),
                denom: denom.to_string(),
                amount,
            }),
            Err(e) => malformed.push(format!("fungible_token_packet amount '{}': {}", amount, e)),
        }
    }

    transfers
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const WALLET: &str = "archway1rv52shjza8lv7pv4avr24nqpqmq4z90yhywwrc";
    const DISTRIBUTION: &str = "archway1jv65s3grqf6v6jl3dp4t6c9t9rk99cd8j5ccrg";

    fn reward_elem() -> serde_json::Value {
        json!({
            "header": { "timestamp": "2023-12-11T11:47:26Z" },
            "data": {
                "txhash": "A1",
                "height": "4889011",
                "code": 0,
                "tx": {
                    "body": { "messages": [{
                        "@type": "/cosmos.distribution.v1beta1.MsgWithdrawDelegatorReward",
                        "delegator_address": WALLET
                    }]},
                    "auth_info": { "fee": { "amount": [{ "denom": "aarch", "amount": "140000000000000000" }], "payer": "" } }
                },
                "logs": [{
                    "msg_index": 0,
                    "events": [{
                        "type": "transfer",
                        "attributes": [
                            { "key": "recipient", "value": WALLET },
                            { "key": "sender", "value": DISTRIBUTION },
                            { "key": "amount", "value": "328123545861830000aarch" }
                        ]
                    }]
                }],
                "events": []
            }
        })
    }

    #[test]
    fn test_parse_coins() {
        let coins = parse_coins("1000uatom,5ibc/27394FB092D2ECCD56123C74F36E4C1F926001CEADA9CA97EA622B25F41E5EB2").unwrap();
        assert_eq!(coins.len(), 2);
        assert_eq!(coins[0].amount, 1000);
        assert_eq!(coins[1].denom, "ibc/27394FB092D2ECCD56123C74F36E4C1F926001CEADA9CA97EA622B25F41E5EB2");

        assert!(parse_coins("").unwrap().is_empty());
        assert!(parse_coins("uatom").is_err());
        assert!(parse_coins("12").is_err());
    }

    #[test]
    fn test_parse_mintscan_elem() {
        let tx = parse_mintscan_elem(reward_elem()).unwrap();

        assert_eq!(tx.id, "A1");
        assert_eq!(tx.height, 4889011);
        assert!(!tx.failed);
        assert_eq!(tx.timestamp.to_rfc3339(), "2023-12-11T11:47:26+00:00");
        assert_eq!(tx.movements.len(), 1);
        assert_eq!(tx.movements[0].receiver, WALLET);
        assert_eq!(tx.movements[0].amount, 328_123_545_861_830_000);

        let fee = tx.fee.unwrap();
        assert_eq!(fee.payer.as_deref(), Some(WALLET));
        assert_eq!(fee.coins[0].amount, 140_000_000_000_000_000);
        assert!(tx.malformed.is_empty());
    }

    #[test]
    fn test_repeated_transfer_attributes_split_into_triples() {
        let mut elem = reward_elem();
        elem["data"]["logs"][0]["events"][0]["attributes"] = json!([
            { "key": "recipient", "value": WALLET },
            { "key": "sender", "value": DISTRIBUTION },
            { "key": "amount", "value": "10aarch" },
            { "key": "recipient", "value": DISTRIBUTION },
            { "key": "sender", "value": WALLET },
            { "key": "amount", "value": "3aarch,1uatom" }
        ]);

        let tx = parse_mintscan_elem(elem).unwrap();
        assert_eq!(tx.movements.len(), 3);
        assert_eq!(tx.movements[2].denom, "uatom");
        assert_eq!(tx.movements[2].sender, WALLET);
    }

    #[test]
    fn test_event_only_transactions_skip_fee_transfer() {
        let mut elem = reward_elem();
        elem["data"]["logs"] = json!([]);
        elem["data"]["events"] = json!([
            { "type": "transfer", "attributes": [
                { "key": "recipient", "value": "archway17xpfvakm2amg962yls6f84z3kell8c5l9jlyp2" },
                { "key": "sender", "value": WALLET },
                { "key": "amount", "value": "140000000000000000aarch" }
            ]},
            { "type": "tx", "attributes": [
                { "key": "fee", "value": "140000000000000000aarch" },
                { "key": "fee_payer", "value": WALLET }
            ]},
            { "type": "transfer", "attributes": [
                { "key": "recipient", "value": WALLET },
                { "key": "sender", "value": DISTRIBUTION },
                { "key": "amount", "value": "5aarch" },
                { "key": "msg_index", "value": "0" }
            ]}
        ]);

        let tx = parse_mintscan_elem(elem).unwrap();
        assert_eq!(tx.movements.len(), 1);
        assert_eq!(tx.movements[0].amount, 5);
        assert_eq!(tx.movements[0].msg_index, Some(0));
    }

    #[test]
    fn test_malformed_amount_is_kept_as_reason() {
        let mut elem = reward_elem();
        elem["data"]["logs"][0]["events"][0]["attributes"][2]["value"] = json!("lots-of-aarch");

        let tx = parse_mintscan_elem(elem).unwrap();
        assert!(tx.movements.is_empty());
        assert_eq!(tx.malformed.len(), 1);
    }

    #[test]
    fn test_failed_and_missing_timestamp() {
        let mut failed = reward_elem();
        failed["data"]["code"] = json!(5);
        assert!(parse_mintscan_elem(failed).unwrap().failed);

        let mut no_time = reward_elem();
        no_time["header"] = json!({});
        assert!(matches!(
            parse_mintscan_elem(no_time),
            Err(HistoryError::MalformedTransaction { .. })
        ));
    }

    #[test]
    fn test_ibc_transfers_deduplicated() {
        let receiver = "osmo1rv52shjza8lv7pv4avr24nqpqmq4z90y25p6la";
        let mut elem = reward_elem();
        elem["data"]["tx"]["body"]["messages"] = json!([{
            "@type": MSG_TRANSFER,
            "sender": WALLET,
            "receiver": receiver,
            "token": { "denom": "aarch", "amount": "1000" }
        }]);
        elem["data"]["events"] = json!([{
            "type": "fungible_token_packet",
            "attributes": [
                { "key": "sender", "value": WALLET },
                { "key": "receiver", "value": receiver },
                { "key": "denom", "value": "aarch" },
                { "key": "amount", "value": "1000" }
            ]
        }]);

        let tx = parse_mintscan_elem(elem).unwrap();
        assert_eq!(tx.ibc_transfers.len(), 1);
        assert_eq!(tx.ibc_transfers[0].receiver, receiver);
    }

    #[test]
    fn test_parse_lcd_tx() {
        let body = json!({
            "tx_response": {
                "txhash": "B2",
                "height": 100,
                "code": 0,
                "timestamp": "2024-01-10T18:35:55Z",
                "logs": [],
                "events": []
            }
        });

        let tx = parse_lcd_tx(body).unwrap();
        assert_eq!(tx.id, "B2");
        assert_eq!(tx.height, 100);
        assert!(tx.fee.is_none());
    }
}
