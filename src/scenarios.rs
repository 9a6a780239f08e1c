//! Keyword fast-path classifier.
//!
//! Zero-latency, zero-cost fallback for when the AI path is unavailable or
//! under-confident. Case-insensitive substring match against small keyword
//! tables; reply wording is time-of-day sensitive.

use crate::hours::BusinessHours;
use chrono::NaiveDateTime;

const GREETING_KEYWORDS: &[&str] = &["ciao", "salve", "buongiorno", "buonasera"];
const PAYMENT_KEYWORDS: &[&str] = &["pagamento", "saldo", "fattura", "bonifico"];
const SUPPORT_KEYWORDS: &[&str] = &["aiuto", "supporto", "problema", "assistenza"];
const URGENT_KEYWORDS: &[&str] = &["urgente", "importante", "subito"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scenario {
    Greeting,
    Payment,
    Support,
    Urgent,
}

#[derive(Debug, Clone)]
pub struct ScenarioMatch {
    pub scenario: Scenario,
    pub reply: String,
    /// Urgent matches always escalate to the operations team.
    pub escalate: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct ScenarioMatcher {
    hours: BusinessHours,
}

impl ScenarioMatcher {
    pub fn new(hours: BusinessHours) -> Self {
        Self { hours }
    }

    /// Match a message body against the keyword tables. Urgent wins over the
    /// other scenarios because it carries the escalation side effect.
    pub fn match_message(&self, body: &str, now: NaiveDateTime) -> Option<ScenarioMatch> {
        let lower = body.to_lowercase();
        let open = self.hours.is_open(now);

        let contains_any = |keywords: &[&str]| keywords.iter().any(|k| lower.contains(k));

        if contains_any(URGENT_KEYWORDS) {
            return Some(ScenarioMatch {
                scenario: Scenario::Urgent,
                reply: if open {
                    "Abbiamo ricevuto la tua segnalazione urgente: un operatore ti ricontatterà al più presto.".into()
                } else {
                    "Segnalazione urgente ricevuta. Siamo chiusi, ma il team è stato avvisato e ti ricontatterà appena possibile.".into()
                },
                escalate: true,
            });
        }

        if contains_any(PAYMENT_KEYWORDS) {
            return Some(ScenarioMatch {
                scenario: Scenario::Payment,
                reply: if open {
                    "Per pagamenti e fatture ti risponderà a breve l'amministrazione. Grazie!".into()
                } else {
                    "Per pagamenti e fatture l'amministrazione ti risponderà il prossimo giorno lavorativo.".into()
                },
                escalate: false,
            });
        }

        if contains_any(SUPPORT_KEYWORDS) {
            return Some(ScenarioMatch {
                scenario: Scenario::Support,
                reply: if open {
                    "Grazie per la segnalazione: il supporto ti risponderà entro poche ore.".into()
                } else {
                    "Grazie per la segnalazione: il supporto la prenderà in carico alla riapertura.".into()
                },
                escalate: false,
            });
        }

        if contains_any(GREETING_KEYWORDS) {
            return Some(ScenarioMatch {
                scenario: Scenario::Greeting,
                reply: if open {
                    "Ciao! Come possiamo aiutarti? Siamo operativi e ti rispondiamo a breve.".into()
                } else {
                    "Ciao! Al momento siamo chiusi: ti risponderemo il prossimo giorno lavorativo.".into()
                },
                escalate: false,
            });
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn open_time() -> NaiveDateTime {
        // Wednesday 10:00
        NaiveDate::from_ymd_opt(2026, 1, 7)
            .unwrap()
            .and_hms_opt(10, 0, 0)
            .unwrap()
    }

    fn closed_time() -> NaiveDateTime {
        // Sunday 10:00
        NaiveDate::from_ymd_opt(2026, 1, 11)
            .unwrap()
            .and_hms_opt(10, 0, 0)
            .unwrap()
    }

    fn matcher() -> ScenarioMatcher {
        ScenarioMatcher::new(BusinessHours::default())
    }

    #[test]
    fn greeting_matches_case_insensitive() {
        let m = matcher().match_message("CIAO, Buongiorno!", open_time()).unwrap();
        assert_eq!(m.scenario, Scenario::Greeting);
        assert!(!m.escalate);
    }

    #[test]
    fn greeting_wording_differs_out_of_hours() {
        let open = matcher().match_message("ciao", open_time()).unwrap();
        let closed = matcher().match_message("ciao", closed_time()).unwrap();
        assert_ne!(open.reply, closed.reply);
        assert!(closed.reply.contains("chiusi"));
    }

    #[test]
    fn payment_keywords_match() {
        for body in ["stato del pagamento?", "il mio saldo", "la fattura 42"] {
            let m = matcher().match_message(body, open_time()).unwrap();
            assert_eq!(m.scenario, Scenario::Payment);
        }
    }

    #[test]
    fn support_keywords_match() {
        let m = matcher()
            .match_message("ho un problema con l'accesso", open_time())
            .unwrap();
        assert_eq!(m.scenario, Scenario::Support);
    }

    #[test]
    fn urgent_escalates_and_wins_over_greeting() {
        let m = matcher()
            .match_message("ciao, è urgente!", open_time())
            .unwrap();
        assert_eq!(m.scenario, Scenario::Urgent);
        assert!(m.escalate);
    }

    #[test]
    fn unmatched_body_returns_none() {
        assert!(matcher()
            .match_message("vorrei informazioni generiche", open_time())
            .is_none());
    }

    #[test]
    fn replies_respect_length_bound() {
        for body in ["ciao", "pagamento", "aiuto", "urgente"] {
            for t in [open_time(), closed_time()] {
                let m = matcher().match_message(body, t).unwrap();
                assert!(
                    m.reply.chars().count() <= crate::message::MAX_REPLY_CHARS,
                    "reply for {body:?} too long"
                );
            }
        }
    }

    #[test]
    fn greeting_outside_hours_does_not_escalate() {
        let m = matcher()
            .match_message("Ciao, buongiorno", closed_time())
            .unwrap();
        assert_eq!(m.scenario, Scenario::Greeting);
        assert!(!m.escalate);
    }
}
