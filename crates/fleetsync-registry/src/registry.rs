//! Session registry: liveness tracking for displays without a persistent
//! connection.
//!
//! Every heartbeat upserts a [`ClientSession`]. Sessions leave the registry
//! either through an explicit end call or through [`SessionRegistry::expire_stale`],
//! which the sweeper runs on its own timer. Removal is terminal; a later
//! heartbeat for the same id starts a fresh session.

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{DateTime, TimeDelta, Utc};
use fleetsync_core::types::{
    ActiveCounts, ActiveSessionView, ClientMetadata, ClientSession, ClientType, SessionStats,
};

// ─── Constants ───────────────────────────────────────────────────────

/// Default staleness threshold in seconds: three missed 30s heartbeats.
pub const DEFAULT_STALE_THRESHOLD_SECS: i64 = 90;

// ─── Heartbeat input ─────────────────────────────────────────────────

/// Everything the registry needs from one heartbeat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sighting {
    pub client_id: String,
    pub client_type: ClientType,
    pub current_page: String,
    pub metadata: ClientMetadata,
    pub source_address: Option<String>,
}

// ─── Session Registry ────────────────────────────────────────────────

#[derive(Debug)]
pub struct SessionRegistry {
    sessions: HashMap<String, ClientSession>,
    stale_threshold: TimeDelta,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::with_stale_threshold(TimeDelta::seconds(DEFAULT_STALE_THRESHOLD_SECS))
    }

    pub fn with_stale_threshold(stale_threshold: TimeDelta) -> Self {
        Self {
            sessions: HashMap::new(),
            stale_threshold,
        }
    }

    pub fn stale_threshold(&self) -> TimeDelta {
        self.stale_threshold
    }

    /// Upsert a session from a heartbeat and return the live totals.
    ///
    /// A new session gets `first_seen_at = now`. `last_heartbeat_at` never
    /// moves backwards, so an out-of-order heartbeat cannot shorten a
    /// session's remaining lifetime. A session already past the threshold
    /// counts as expired even before a sweep: its record is replaced.
    pub fn register_or_refresh(&mut self, sighting: Sighting, now: DateTime<Utc>) -> ActiveCounts {
        let threshold = self.stale_threshold;
        match self
            .sessions
            .get_mut(&sighting.client_id)
            .filter(|existing| !is_stale(existing, now, threshold))
        {
            Some(existing) => {
                existing.client_type = sighting.client_type;
                existing.current_page = sighting.current_page;
                existing.metadata = sighting.metadata;
                if sighting.source_address.is_some() {
                    existing.source_address = sighting.source_address;
                }
                if now > existing.last_heartbeat_at {
                    existing.last_heartbeat_at = now;
                }
            }
            None => {
                let session = ClientSession {
                    client_id: sighting.client_id.clone(),
                    client_type: sighting.client_type,
                    current_page: sighting.current_page,
                    metadata: sighting.metadata,
                    first_seen_at: now,
                    last_heartbeat_at: now,
                    source_address: sighting.source_address,
                };
                self.sessions.insert(sighting.client_id, session);
            }
        }

        self.active_counts(now)
    }

    /// Remove a session. Idempotent: returns `false` (not an error) when the
    /// session is already gone.
    pub fn end_session(&mut self, client_id: &str) -> bool {
        self.sessions.remove(client_id).is_some()
    }

    /// Remove every session whose last heartbeat is older than the threshold.
    ///
    /// Returns the removed client ids, sorted.
    pub fn expire_stale(&mut self, now: DateTime<Utc>) -> Vec<String> {
        let threshold = self.stale_threshold;
        let mut expired = Vec::new();
        self.sessions.retain(|id, session| {
            let keep = !is_stale(session, now, threshold);
            if !keep {
                expired.push(id.clone());
            }
            keep
        });
        expired.sort();
        expired
    }

    fn live(&self, now: DateTime<Utc>) -> impl Iterator<Item = &ClientSession> {
        let threshold = self.stale_threshold;
        self.sessions
            .values()
            .filter(move |s| !is_stale(s, now, threshold))
    }

    /// Live totals by client type. Sessions past the threshold but not yet
    /// swept are not counted.
    pub fn active_counts(&self, now: DateTime<Utc>) -> ActiveCounts {
        let mut counts = ActiveCounts::default();
        for session in self.live(now) {
            counts.total += 1;
            *counts.by_client_type.entry(session.client_type).or_insert(0) += 1;
        }
        counts
    }

    pub fn compute_stats(&self, now: DateTime<Utc>) -> SessionStats {
        let mut by_client_type: BTreeMap<ClientType, usize> = BTreeMap::new();
        let mut current_pages: BTreeMap<String, usize> = BTreeMap::new();
        let mut addresses: HashSet<&str> = HashSet::new();
        let mut total = 0usize;
        let mut total_minutes = 0f64;

        for session in self.live(now) {
            total += 1;
            *by_client_type.entry(session.client_type).or_insert(0) += 1;
            *current_pages.entry(session.current_page.clone()).or_insert(0) += 1;
            if let Some(addr) = session.source_address.as_deref() {
                addresses.insert(addr);
            }
            total_minutes += session_duration(session, now).num_seconds() as f64 / 60.0;
        }

        let avg_session_duration_minutes = if total == 0 {
            0.0
        } else {
            total_minutes / total as f64
        };

        SessionStats {
            total_active_sessions: total,
            by_client_type,
            current_pages,
            avg_session_duration_minutes,
            unique_source_addresses: addresses.len(),
        }
    }

    /// Live sessions sorted by client id.
    pub fn list_active(&self, now: DateTime<Utc>) -> Vec<ActiveSessionView> {
        let mut views: Vec<ActiveSessionView> = self
            .live(now)
            .map(|s| ActiveSessionView {
                client_id: s.client_id.clone(),
                client_type: s.client_type,
                current_page: s.current_page.clone(),
                duration_minutes: session_duration(s, now).num_minutes(),
                source_address: s.source_address.clone(),
            })
            .collect();
        views.sort_by(|a, b| a.client_id.cmp(&b.client_id));
        views
    }

    pub fn get(&self, client_id: &str) -> Option<&ClientSession> {
        self.sessions.get(client_id)
    }

    /// Number of records held, including stale ones awaiting the sweep.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn is_stale(session: &ClientSession, now: DateTime<Utc>, threshold: TimeDelta) -> bool {
    now - session.last_heartbeat_at > threshold
}

fn session_duration(session: &ClientSession, now: DateTime<Utc>) -> TimeDelta {
    (now - session.first_seen_at).max(TimeDelta::zero())
}

// ─── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    // ── Helpers ──────────────────────────────────────────────────────

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).single().expect("valid ts")
    }

    fn at(secs: i64) -> DateTime<Utc> {
        t0() + TimeDelta::seconds(secs)
    }

    fn sighting(client_id: &str, client_type: ClientType, page: &str) -> Sighting {
        Sighting {
            client_id: client_id.to_owned(),
            client_type,
            current_page: page.to_owned(),
            metadata: ClientMetadata::default(),
            source_address: None,
        }
    }

    fn sighting_from(client_id: &str, addr: &str) -> Sighting {
        Sighting {
            source_address: Some(addr.to_owned()),
            ..sighting(client_id, ClientType::Kiosk, "/")
        }
    }

    // ── Registration ────────────────────────────────────────────────

    #[test]
    fn empty_registry() {
        let reg = SessionRegistry::new();
        assert!(reg.is_empty());
        assert_eq!(reg.active_counts(t0()).total, 0);
        assert!(reg.get("nonexistent").is_none());
        assert_eq!(reg.stale_threshold(), TimeDelta::seconds(90));
    }

    #[test]
    fn first_heartbeat_creates_session() {
        let mut reg = SessionRegistry::new();
        let counts = reg.register_or_refresh(sighting("k1", ClientType::Kiosk, "/news"), t0());

        assert_eq!(counts.total, 1);
        assert_eq!(counts.of(ClientType::Kiosk), 1);
        let s = reg.get("k1").expect("session exists");
        assert_eq!(s.first_seen_at, t0());
        assert_eq!(s.last_heartbeat_at, t0());
        assert_eq!(s.current_page, "/news");
    }

    #[test]
    fn refresh_keeps_first_seen_and_advances_heartbeat() {
        let mut reg = SessionRegistry::new();
        reg.register_or_refresh(sighting("k1", ClientType::Kiosk, "/news"), t0());
        reg.register_or_refresh(sighting("k1", ClientType::Kiosk, "/vehicles"), at(30));

        assert_eq!(reg.len(), 1, "at most one record per client id");
        let s = reg.get("k1").expect("session exists");
        assert_eq!(s.first_seen_at, t0());
        assert_eq!(s.last_heartbeat_at, at(30));
        assert_eq!(s.current_page, "/vehicles");
    }

    #[test]
    fn out_of_order_heartbeat_never_moves_clock_back() {
        let mut reg = SessionRegistry::new();
        reg.register_or_refresh(sighting("k1", ClientType::Kiosk, "/"), at(60));
        reg.register_or_refresh(sighting("k1", ClientType::Kiosk, "/"), at(30));

        assert_eq!(reg.get("k1").expect("exists").last_heartbeat_at, at(60));
    }

    #[test]
    fn refresh_without_address_keeps_known_address() {
        let mut reg = SessionRegistry::new();
        reg.register_or_refresh(sighting_from("k1", "10.0.0.5"), t0());
        reg.register_or_refresh(sighting("k1", ClientType::Kiosk, "/"), at(30));

        assert_eq!(
            reg.get("k1").expect("exists").source_address.as_deref(),
            Some("10.0.0.5")
        );
    }

    #[test]
    fn counts_split_by_client_type() {
        let mut reg = SessionRegistry::new();
        reg.register_or_refresh(sighting("k1", ClientType::Kiosk, "/"), t0());
        reg.register_or_refresh(sighting("k2", ClientType::Kiosk, "/"), t0());
        reg.register_or_refresh(sighting("a1", ClientType::Admin, "/admin"), t0());
        let counts = reg.register_or_refresh(sighting("m1", ClientType::Mobile, "/"), t0());

        assert_eq!(counts.total, 4);
        assert_eq!(counts.of(ClientType::Kiosk), 2);
        assert_eq!(counts.of(ClientType::Admin), 1);
        assert_eq!(counts.of(ClientType::Mobile), 1);
        assert_eq!(counts.of(ClientType::User), 0);
    }

    // ── End session ─────────────────────────────────────────────────

    #[test]
    fn end_session_is_idempotent() {
        let mut reg = SessionRegistry::new();
        reg.register_or_refresh(sighting("k1", ClientType::Kiosk, "/"), t0());

        assert!(reg.end_session("k1"));
        assert!(!reg.end_session("k1"), "second call is a no-op");
        assert!(!reg.end_session("never-seen"));
        assert!(reg.is_empty());
    }

    #[test]
    fn heartbeat_after_end_starts_fresh_session() {
        let mut reg = SessionRegistry::new();
        reg.register_or_refresh(sighting("k1", ClientType::Kiosk, "/"), t0());
        reg.end_session("k1");
        reg.register_or_refresh(sighting("k1", ClientType::Kiosk, "/"), at(120));

        assert_eq!(reg.get("k1").expect("exists").first_seen_at, at(120));
    }

    #[test]
    fn heartbeat_after_lapse_before_sweep_starts_fresh_session() {
        let mut reg = SessionRegistry::new();
        reg.register_or_refresh(sighting_from("k1", "10.0.0.5"), t0());
        assert_eq!(reg.compute_stats(at(300)).total_active_sessions, 0);

        let counts = reg.register_or_refresh(sighting("k1", ClientType::Kiosk, "/news"), at(300));
        assert_eq!(counts.total, 1);
        assert_eq!(reg.len(), 1);

        let s = reg.get("k1").expect("exists");
        assert_eq!(s.first_seen_at, at(300), "no resurrection of the lapsed record");
        assert_eq!(s.last_heartbeat_at, at(300));
        assert!(s.source_address.is_none(), "old record's fields are not carried over");

        let active = reg.list_active(at(300));
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].duration_minutes, 0);
    }

    // ── Staleness ───────────────────────────────────────────────────

    #[test]
    fn expire_stale_uses_strict_threshold() {
        let mut reg = SessionRegistry::new();
        reg.register_or_refresh(sighting("k1", ClientType::Kiosk, "/"), t0());

        assert!(reg.expire_stale(at(90)).is_empty(), "exactly at threshold is alive");
        assert_eq!(reg.expire_stale(at(91)), vec!["k1".to_owned()]);
        assert!(reg.is_empty());
    }

    #[test]
    fn expire_stale_only_removes_lapsed_sessions() {
        let mut reg = SessionRegistry::new();
        reg.register_or_refresh(sighting("old", ClientType::Kiosk, "/"), t0());
        reg.register_or_refresh(sighting("fresh", ClientType::Kiosk, "/"), at(60));

        let expired = reg.expire_stale(at(100));
        assert_eq!(expired, vec!["old".to_owned()]);
        assert!(reg.get("fresh").is_some());
    }

    #[test]
    fn heartbeats_within_threshold_never_lapse() {
        let mut reg = SessionRegistry::new();
        reg.register_or_refresh(sighting("k1", ClientType::Kiosk, "/"), t0());
        for secs in (90..=900).step_by(90) {
            // sweep and stats land right before the next heartbeat
            assert!(reg.expire_stale(at(secs)).is_empty());
            assert_eq!(reg.compute_stats(at(secs)).total_active_sessions, 1);
            reg.register_or_refresh(sighting("k1", ClientType::Kiosk, "/"), at(secs));
        }
    }

    #[test]
    fn stats_exclude_stale_sessions_before_sweep() {
        let mut reg = SessionRegistry::new();
        reg.register_or_refresh(sighting("k1", ClientType::Kiosk, "/"), t0());
        reg.register_or_refresh(sighting("k2", ClientType::Kiosk, "/"), at(60));

        let stats = reg.compute_stats(at(120));
        assert_eq!(stats.total_active_sessions, 1);
        assert_eq!(reg.len(), 2, "record is still held until the sweep");
        assert_eq!(reg.active_counts(at(120)).total, 1);
    }

    #[test]
    fn custom_threshold() {
        let mut reg = SessionRegistry::with_stale_threshold(TimeDelta::seconds(10));
        reg.register_or_refresh(sighting("k1", ClientType::Kiosk, "/"), t0());
        assert_eq!(reg.expire_stale(at(11)).len(), 1);
    }

    // ── Stats ───────────────────────────────────────────────────────

    #[test]
    fn stats_aggregate_pages_addresses_and_duration() {
        let mut reg = SessionRegistry::new();
        reg.register_or_refresh(
            Sighting {
                current_page: "/news".into(),
                ..sighting_from("k1", "10.0.0.5")
            },
            t0(),
        );
        reg.register_or_refresh(
            Sighting {
                current_page: "/news".into(),
                ..sighting_from("k2", "10.0.0.5")
            },
            at(60),
        );
        reg.register_or_refresh(
            Sighting {
                client_type: ClientType::Admin,
                current_page: "/admin".into(),
                ..sighting_from("a1", "10.0.0.9")
            },
            at(60),
        );
        // keep k1 alive
        reg.register_or_refresh(
            Sighting {
                current_page: "/news".into(),
                ..sighting_from("k1", "10.0.0.5")
            },
            at(120),
        );

        let stats = reg.compute_stats(at(120));
        assert_eq!(stats.total_active_sessions, 3);
        assert_eq!(stats.by_client_type[&ClientType::Kiosk], 2);
        assert_eq!(stats.by_client_type[&ClientType::Admin], 1);
        assert_eq!(stats.current_pages["/news"], 2);
        assert_eq!(stats.current_pages["/admin"], 1);
        assert_eq!(stats.unique_source_addresses, 2);
        // durations: 2min, 1min, 1min
        assert!((stats.avg_session_duration_minutes - 4.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn stats_empty_registry_has_zero_average() {
        let reg = SessionRegistry::new();
        let stats = reg.compute_stats(t0());
        assert_eq!(stats.total_active_sessions, 0);
        assert_eq!(stats.avg_session_duration_minutes, 0.0);
    }

    #[test]
    fn list_active_sorted_with_duration() {
        let mut reg = SessionRegistry::new();
        reg.register_or_refresh(sighting("charlie", ClientType::Kiosk, "/"), t0());
        reg.register_or_refresh(sighting("alpha", ClientType::Mobile, "/m"), at(30));
        reg.register_or_refresh(sighting("charlie", ClientType::Kiosk, "/"), at(60));

        let list = reg.list_active(at(90));
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].client_id, "alpha");
        assert_eq!(list[0].duration_minutes, 1);
        assert_eq!(list[1].client_id, "charlie");
        assert_eq!(list[1].duration_minutes, 1);
        assert_eq!(list[1].client_type, ClientType::Kiosk);
    }

    #[test]
    fn stats_serialize_camel_case() {
        let mut reg = SessionRegistry::new();
        reg.register_or_refresh(sighting("k1", ClientType::Kiosk, "/"), t0());
        let json = serde_json::to_value(reg.compute_stats(t0())).expect("serialize");
        assert_eq!(json["totalActiveSessions"], 1);
        assert_eq!(json["byClientType"]["kiosk"], 1);
    }
}
