//! Verdicts for decoded frames

use bytes::{BufMut, Bytes, BytesMut};
use sqlframe::{Decoded, Frame, FrameHeader, PACKET_HEADER_SIZE};
use tracing::debug;

use crate::{
    policy::RuleSet,
    statement::{Statement, extract},
    traits::GrammarParser,
};

/// Error code reported in synthetic denial packets (table access denied)
pub const ER_TABLEACCESS_DENIED: u16 = 1142;
/// SQL state reported in synthetic denial packets
pub const SQLSTATE_ACCESS_DENIED: &[u8; 5] = b"42000";
/// Reply substituted for a dropped line command
pub const LINE_ERROR_REPLY: &[u8] = b"ERROR\r\n";

const DENIED_MESSAGE: &[u8] = b"statement denied by policy";

/// Decision for one frame, or a request for more bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Forward `consumed` bytes unchanged
    Pass { consumed: usize },
    /// Discard `consumed` bytes, optionally injecting `reply` toward the
    /// sender
    Drop {
        consumed: usize,
        reply:    Option<Bytes>,
    },
    /// Nothing can be decided until `needed` more bytes arrive
    More { needed: usize },
}

impl Verdict {
    /// Bytes this verdict accounts for (0 for `More`)
    pub fn consumed(&self) -> usize {
        match self {
            Self::Pass { consumed } | Self::Drop { consumed, .. } => *consumed,
            Self::More { .. } => 0,
        }
    }

    pub fn is_pass(&self) -> bool {
        matches!(self, Self::Pass { .. })
    }

    pub fn is_drop(&self) -> bool {
        matches!(self, Self::Drop { .. })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pass { .. } => "pass",
            Self::Drop { .. } => "drop",
            Self::More { .. } => "more",
        }
    }
}

/// A verdict with the statement it was decided on.
///
/// `statement` is `None` for `More` and for dropped malformed bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Evaluation {
    pub verdict:   Verdict,
    pub statement: Option<Statement>,
}

/// Decide every frame of `decoded` against `rules`, in arrival order.
///
/// Malformed bytes become one `Drop` without reply, since untrusted bytes are
/// never forwarded. A `More` is appended last when the decoder needs more
/// input.
pub fn evaluate(
    decoded: &Decoded,
    rules: &RuleSet,
    deny_reply: bool,
    grammar: &dyn GrammarParser,
) -> Vec<Evaluation> {
    let mut evaluations = Vec::with_capacity(decoded.frames.len() + 1);

    for frame in &decoded.frames {
        let statement = extract(frame, grammar);
        let verdict = if rules.matches(&statement) {
            Verdict::Pass {
                consumed: frame.wire_len,
            }
        } else {
            Verdict::Drop {
                consumed: frame.wire_len,
                reply:    deny_reply.then(|| error_reply(frame)),
            }
        };
        debug!(
            action = %statement.action,
            schema = statement.schema.as_deref().unwrap_or(""),
            table = statement.table.as_deref().unwrap_or(""),
            verdict = verdict.as_str(),
            consumed = frame.wire_len,
            "frame decided"
        );
        evaluations.push(Evaluation {
            verdict,
            statement: Some(statement),
        });
    }

    if let Some(malformed) = &decoded.malformed {
        evaluations.push(Evaluation {
            verdict:   Verdict::Drop {
                consumed: malformed.discarded,
                reply:    None,
            },
            statement: None,
        });
    } else if let Some(needed) = decoded.need_more {
        evaluations.push(Evaluation {
            verdict:   Verdict::More { needed },
            statement: None,
        });
    }

    evaluations
}

/// [`evaluate`] without the statements
pub fn decide(
    decoded: &Decoded,
    rules: &RuleSet,
    deny_reply: bool,
    grammar: &dyn GrammarParser,
) -> Vec<Verdict> {
    evaluate(decoded, rules, deny_reply, grammar)
        .into_iter()
        .map(|e| e.verdict)
        .collect()
}

/// Synthetic reply for a dropped `frame`, in the frame's own protocol
pub fn error_reply(frame: &Frame) -> Bytes {
    match &frame.header {
        FrameHeader::Line => Bytes::from_static(LINE_ERROR_REPLY),
        FrameHeader::Packet(header) => error_packet(
            header.sequence_id.wrapping_add(1),
            ER_TABLEACCESS_DENIED,
            SQLSTATE_ACCESS_DENIED,
            DENIED_MESSAGE,
        ),
    }
}

/// Encode an error packet:
/// `[0xff][code: u16 LE]['#'][sql state: 5 bytes][message]`
pub fn error_packet(sequence_id: u8, code: u16, sql_state: &[u8; 5], message: &[u8]) -> Bytes {
    // Marker, code, '#', state
    let payload_len = 1 + 2 + 1 + sql_state.len() + message.len();
    let mut packet = BytesMut::with_capacity(PACKET_HEADER_SIZE + payload_len);
    packet.put_uint_le(payload_len as u64, 3);
    packet.put_u8(sequence_id);
    packet.put_u8(0xff);
    packet.put_u16_le(code);
    packet.put_u8(b'#');
    packet.put_slice(sql_state);
    packet.put_slice(message);
    packet.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::RuleSpec,
        grammar::{NoGrammar, SqlGrammar},
        policy::RuleKey,
    };
    use rstest::rstest;
    use sqlframe::{FrameState, Protocol, parse_packet_header};

    fn query(sequence_id: u8, sql: &str) -> Vec<u8> {
        let mut payload = vec![0x03];
        payload.extend_from_slice(sql.as_bytes());
        sqlframe::encode_packet(sequence_id, &payload).unwrap()
    }

    fn decode(protocol: Protocol, data: &[u8]) -> Decoded {
        FrameState::new(protocol).feed(data).unwrap()
    }

    #[test]
    fn test_incomplete_packet_yields_more() {
        let mut data = vec![0x0f, 0x00, 0x00, 0x00, 0x03];
        data.extend_from_slice(b"show database");
        let verdicts = decide(
            &decode(Protocol::LengthPrefixed, &data),
            &RuleSet::allow_all(),
            true,
            &SqlGrammar,
        );
        assert_eq!(verdicts, vec![Verdict::More { needed: 1 }]);
    }

    #[test]
    fn test_allow_all_passes_each_frame() {
        let statements = [
            "select * from t",
            "insert into t values (1)",
            "update t set a = 1",
            "delete from t",
        ];
        for sql in statements {
            let packet = query(0, sql);
            let verdicts = decide(
                &decode(Protocol::LengthPrefixed, &packet),
                &RuleSet::allow_all(),
                true,
                &SqlGrammar,
            );
            assert_eq!(
                verdicts,
                vec![Verdict::Pass {
                    consumed: packet.len()
                }]
            );
        }
    }

    #[test]
    fn test_line_pass_drop_more() {
        let rules = RuleSet::compile(&[RuleSpec::new(RuleKey::Cmd, "READ")]).unwrap();
        let verdicts = decide(
            &decode(Protocol::Line, b"READ x\r\nWRITE x\r\n"),
            &rules,
            true,
            &NoGrammar,
        );
        assert_eq!(
            verdicts,
            vec![
                Verdict::Pass { consumed: 8 },
                Verdict::Drop {
                    consumed: 9,
                    reply:    Some(Bytes::from_static(b"ERROR\r\n")),
                },
                Verdict::More { needed: 1 },
            ]
        );
    }

    #[rstest]
    #[case::with_reply(true)]
    #[case::without_reply(false)]
    fn test_deny_reply_switch(#[case] deny_reply: bool) {
        let rules = RuleSet::compile(&[RuleSpec::new(RuleKey::Cmd, "select")]).unwrap();
        let packet = query(4, "delete from t");
        let verdicts = decide(
            &decode(Protocol::LengthPrefixed, &packet),
            &rules,
            deny_reply,
            &SqlGrammar,
        );
        assert_eq!(verdicts.len(), 1);
        let Verdict::Drop { consumed, reply } = &verdicts[0] else {
            panic!("expected drop, got {:?}", verdicts[0]);
        };
        assert_eq!(*consumed, packet.len());
        assert_eq!(reply.is_some(), deny_reply);
    }

    #[test]
    fn test_error_packet_layout() {
        let packet = error_packet(5, ER_TABLEACCESS_DENIED, SQLSTATE_ACCESS_DENIED, b"no");
        let header = parse_packet_header(&packet).unwrap();
        assert_eq!(header.length as usize, packet.len() - PACKET_HEADER_SIZE);
        assert_eq!(header.sequence_id, 5);
        assert_eq!(header.command, Some(0xff));
        assert_eq!(&packet[5..7], &1142u16.to_le_bytes());
        assert_eq!(&packet[7..], b"#42000no");
    }

    #[test]
    fn test_error_reply_follows_request_sequence() {
        let decoded = decode(Protocol::LengthPrefixed, &query(0xff, "drop table t"));
        let reply = error_reply(&decoded.frames[0]);
        // Sequence id wraps
        assert_eq!(reply[3], 0x00);
        assert_eq!(reply[4], 0xff);
    }

    #[test]
    fn test_malformed_residue_dropped_without_reply() {
        let mut data = query(0, "select 1");
        let valid = data.len();
        data.extend_from_slice(&[0xff, 0xff, 0xff, 0x01, 0x03]);
        let evaluations = evaluate(
            &decode(Protocol::LengthPrefixed, &data),
            &RuleSet::allow_all(),
            true,
            &SqlGrammar,
        );
        assert_eq!(evaluations.len(), 2);
        assert_eq!(evaluations[0].verdict, Verdict::Pass { consumed: valid });
        assert_eq!(
            evaluations[0].statement.as_ref().map(|s| s.action.as_str()),
            Some("select")
        );
        assert_eq!(
            evaluations[1].verdict,
            Verdict::Drop {
                consumed: 5,
                reply:    None,
            }
        );
        assert!(evaluations[1].statement.is_none());
    }

    #[test]
    fn test_verdict_helpers() {
        let pass = Verdict::Pass { consumed: 3 };
        let drop = Verdict::Drop {
            consumed: 4,
            reply:    None,
        };
        let more = Verdict::More { needed: 2 };
        assert!(pass.is_pass() && !pass.is_drop());
        assert!(drop.is_drop() && !drop.is_pass());
        assert_eq!(
            [pass.consumed(), drop.consumed(), more.consumed()],
            [3, 4, 0]
        );
        assert_eq!(more.as_str(), "more");
    }
}
