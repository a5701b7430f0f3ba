use crate::error::{classify, ErrorSlot, SyncError, INVALID_CODE_MESSAGE};
use crate::models::{object, CareCircle, Membership, UserIdentity};
use crate::sync::mirror::Mirror;
use crate::sync::subscriber::ScopedSubscription;
use chrono::Utc;
use kinring_backend::{Document, QuerySpec, Store, StoreError};
use rand::Rng;
use serde_json::{json, Value};
use std::sync::Arc;

/// Invite-code alphabet with visually ambiguous characters (0/O, 1/I) removed.
pub const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
pub const CODE_LENGTH: usize = 6;
const CODE_ISSUE_ATTEMPTS: usize = 16;

pub fn generate_invite_code() -> String {
    let mut rng = rand::rng();
    (0..CODE_LENGTH)
        .map(|_| CODE_ALPHABET[rng.random_range(0..CODE_ALPHABET.len())] as char)
        .collect()
}

pub fn is_well_formed_code(raw: &str) -> bool {
    raw.len() == CODE_LENGTH
        && raw
            .bytes()
            .all(|b| CODE_ALPHABET.contains(&b.to_ascii_uppercase()))
}

/// Issues a code no active circle uses yet. The generator is injectable so
/// collision handling stays testable.
fn unique_invite_code(
    store: &Store,
    mut generate: impl FnMut() -> String,
) -> Result<String, SyncError> {
    for _ in 0..CODE_ISSUE_ATTEMPTS {
        let code = generate();
        let existing = store
            .query_equal("circles", "inviteCode", &code)
            .map_err(|err| classify(&err))?;
        if existing.is_empty() {
            return Ok(code);
        }
        tracing::warn!(code = %code, "invite code already in use, regenerating");
    }
    Err(SyncError::Store(
        "could not issue a unique invite code".into(),
    ))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupPhase {
    NoCircle,
    Creating,
    Created,
    Joining,
    Joined,
}

/// Manages the shared family space: creating circles, joining via code, and
/// the live membership list.
pub struct CareCircleService {
    store: Store,
    identity: UserIdentity,
    circle: Option<CareCircle>,
    invite_code: Option<String>,
    phase: SetupPhase,
    errors: ErrorSlot,
    members: Option<ScopedSubscription<Membership>>,
}

impl CareCircleService {
    pub fn new(store: Store, identity: UserIdentity) -> Self {
        Self {
            store,
            identity,
            circle: None,
            invite_code: None,
            phase: SetupPhase::NoCircle,
            errors: ErrorSlot::default(),
            members: None,
        }
    }

    pub fn circle(&self) -> Option<&CareCircle> {
        self.circle.as_ref()
    }

    pub fn circle_id(&self) -> Option<&str> {
        self.circle.as_ref().map(|circle| circle.id.as_str())
    }

    pub fn has_circle(&self) -> bool {
        self.circle.is_some()
    }

    pub fn phase(&self) -> SetupPhase {
        self.phase
    }

    pub fn invite_code(&self) -> Option<&str> {
        self.invite_code.as_deref()
    }

    pub fn errors(&self) -> ErrorSlot {
        self.errors.clone()
    }

    pub fn members(&self) -> Vec<Membership> {
        self.members
            .as_ref()
            .map(|sub| sub.items())
            .unwrap_or_default()
    }

    pub fn member_mirror(&self) -> Option<Arc<Mirror<Membership>>> {
        self.members.as_ref().map(|sub| sub.mirror())
    }

    /// Finds the circle this user belongs to, if any. Tries the indexed
    /// membership lookup first; an empty result triggers the documented
    /// full-scan fallback before we conclude "no circle". Returns the circle
    /// id when one was found; zero matches on both paths is not an error.
    pub fn resolve(&mut self) -> Result<Option<String>, SyncError> {
        let user_id = self.identity.user_id.clone();
        let memberships = self
            .store
            .query_equal("memberships", "userId", &user_id)
            .map_err(|err| self.classify_and_record(&err))?;

        let membership = match memberships.into_iter().next() {
            Some(doc) => Some(doc),
            None => {
                // Indexed lookups have been observed to come back empty while
                // the row exists. Scan everything and filter here instead.
                // O(total memberships across all circles); prototype scale only.
                tracing::warn!(user_id = %user_id, "membership query empty, falling back to full scan");
                let all = self
                    .store
                    .list_all("memberships")
                    .map_err(|err| self.classify_and_record(&err))?;
                tracing::warn!(scanned = all.len(), "membership fallback scan finished");
                all.into_iter()
                    .find(|doc| membership_matches_user(doc, &user_id))
            }
        };

        let Some(membership_doc) = membership else {
            return Ok(None);
        };
        let Some(circle_id) = membership_doc.str_field("circleId").map(str::to_string) else {
            tracing::warn!(doc_id = %membership_doc.id, "membership row missing circleId");
            return Ok(None);
        };
        let circle_doc = self
            .store
            .get("circles", &circle_id)
            .map_err(|err| self.classify_and_record(&err))?;
        match circle_doc.as_ref().and_then(CareCircle::from_document) {
            Some(circle) => {
                let id = circle.id.clone();
                self.attach(circle);
                Ok(Some(id))
            }
            None => {
                tracing::warn!(circle_id = %circle_id, "membership points at a missing circle");
                Ok(None)
            }
        }
    }

    /// Creates a new circle with this user as its senior and issues the
    /// shareable invite code.
    pub fn create_circle(&mut self, senior_name: &str) -> Result<String, SyncError> {
        if senior_name.trim().is_empty() {
            let err = SyncError::Validation("Name may not be empty.".into());
            self.errors.record(err.to_string());
            return Err(err);
        }
        self.errors.clear();
        self.phase = SetupPhase::Creating;

        let outcome = self.create_circle_inner(senior_name);
        if outcome.is_err() {
            self.phase = SetupPhase::NoCircle;
        }
        outcome
    }

    fn create_circle_inner(&mut self, senior_name: &str) -> Result<String, SyncError> {
        let user_id = self.identity.user_id.clone();
        let code = unique_invite_code(&self.store, generate_invite_code)?;
        let circle_id = format!("circle_{}_{}", user_id, Utc::now().timestamp_millis());

        self.store
            .merge_write(
                "circles",
                &circle_id,
                object(json!({
                    "seniorId": user_id,
                    "seniorName": senior_name,
                    "inviteCode": code,
                })),
                &["createdAt"],
            )
            .map_err(|err| self.classify_and_record(&err))?;

        self.store
            .merge_write(
                "memberships",
                &format!("{circle_id}_{user_id}"),
                object(json!({
                    "circleId": circle_id,
                    "userId": user_id,
                    "displayName": senior_name,
                    "role": "senior",
                })),
                &["joinedAt"],
            )
            .map_err(|err| self.classify_and_record(&err))?;

        self.store
            .merge_write(
                &format!("circles/{circle_id}/settings"),
                "main",
                object(json!({"familyStatus": "home"})),
                &["lastUpdated"],
            )
            .map_err(|err| self.classify_and_record(&err))?;

        tracing::info!(circle_id = %circle_id, "care circle created");
        self.invite_code = Some(code.clone());
        self.attach(CareCircle {
            id: circle_id.clone(),
            senior_id: user_id,
            senior_name: senior_name.to_string(),
            invite_code: code,
            created_at: None,
        });
        Ok(circle_id)
    }

    /// Joins an existing circle by invite code (case-insensitive). A malformed
    /// or unknown code returns to the no-circle state with an inline message;
    /// there is no retry limit.
    pub fn join_circle(
        &mut self,
        code: &str,
        display_name: &str,
        relationship: Option<&str>,
    ) -> Result<String, SyncError> {
        let normalized = code.trim().to_ascii_uppercase();
        if !is_well_formed_code(&normalized) {
            let err = SyncError::Validation(INVALID_CODE_MESSAGE.into());
            self.errors.record(err.to_string());
            return Err(err);
        }
        if display_name.trim().is_empty() {
            let err = SyncError::Validation("Display name may not be empty.".into());
            self.errors.record(err.to_string());
            return Err(err);
        }
        self.errors.clear();
        self.phase = SetupPhase::Joining;

        let outcome = self.join_circle_inner(&normalized, display_name, relationship);
        if outcome.is_err() {
            self.phase = SetupPhase::NoCircle;
        }
        outcome
    }

    fn join_circle_inner(
        &mut self,
        code: &str,
        display_name: &str,
        relationship: Option<&str>,
    ) -> Result<String, SyncError> {
        let circles = self
            .store
            .query_equal("circles", "inviteCode", code)
            .map_err(|err| self.classify_and_record(&err))?;
        let Some(circle) = circles.first().and_then(CareCircle::from_document) else {
            let err = SyncError::Validation(INVALID_CODE_MESSAGE.into());
            self.errors.record(err.to_string());
            return Err(err);
        };

        let user_id = self.identity.user_id.clone();
        let circle_id = circle.id.clone();
        self.store
            .merge_write(
                "memberships",
                &format!("{circle_id}_{user_id}"),
                object(json!({
                    "circleId": circle_id,
                    "userId": user_id,
                    "displayName": display_name,
                    "role": "relative",
                    "relationship": relationship.unwrap_or("family"),
                })),
                &["joinedAt"],
            )
            .map_err(|err| self.classify_and_record(&err))?;

        tracing::info!(circle_id = %circle_id, "joined care circle");
        self.attach(circle);
        Ok(circle_id)
    }

    /// Re-reads the invite code for sharing.
    pub fn fetch_invite_code(&mut self) -> Result<Option<String>, SyncError> {
        let Some(circle_id) = self.circle_id().map(str::to_string) else {
            return Ok(None);
        };
        let doc = self
            .store
            .get("circles", &circle_id)
            .map_err(|err| self.classify_and_record(&err))?;
        let code = doc.and_then(|d| d.str_field("inviteCode").map(str::to_string));
        if let Some(code) = &code {
            self.invite_code = Some(code.clone());
        }
        Ok(code)
    }

    pub fn leave_circle(&mut self) -> Result<(), SyncError> {
        let Some(circle_id) = self.circle_id().map(str::to_string) else {
            return Ok(());
        };
        let user_id = &self.identity.user_id;
        self.store
            .delete("memberships", &format!("{circle_id}_{user_id}"))
            .map_err(|err| self.classify_and_record(&err))?;
        if let Some(members) = self.members.take() {
            members.close();
        }
        self.circle = None;
        self.invite_code = None;
        self.phase = SetupPhase::NoCircle;
        Ok(())
    }

    /// Merge-updates the current user's own membership row.
    pub fn update_member(&self, fields: kinring_backend::Fields) -> Result<(), SyncError> {
        let Some(circle_id) = self.circle_id() else {
            return Ok(());
        };
        let doc_id = format!("{}_{}", circle_id, self.identity.user_id);
        self.update_any_member(&doc_id, fields)
    }

    /// Merge-updates any membership row by document id (renames, relationship
    /// changes by the circle admin).
    pub fn update_any_member(
        &self,
        member_doc_id: &str,
        fields: kinring_backend::Fields,
    ) -> Result<(), SyncError> {
        tracing::debug!(member = %member_doc_id, "updating membership");
        self.store
            .merge_write("memberships", member_doc_id, fields, &[])
            .map(|_| ())
            .map_err(|err| self.classify_and_record(&err))
    }

    fn attach(&mut self, circle: CareCircle) {
        let spec = QuerySpec {
            order_field: None,
            limit: None,
            filter_equal: Some(("circleId", circle.id.clone())),
        };
        self.members = Some(ScopedSubscription::open(
            &self.store,
            Some("memberships".to_string()),
            spec,
            self.errors.clone(),
            Membership::from_document,
        ));
        self.phase = if circle.senior_id == self.identity.user_id {
            SetupPhase::Created
        } else {
            SetupPhase::Joined
        };
        self.circle = Some(circle);
    }

    fn classify_and_record(&self, err: &StoreError) -> SyncError {
        let classified = classify(err);
        self.errors.record(classified.to_string());
        classified
    }
}

fn membership_matches_user(doc: &Document, user_id: &str) -> bool {
    match doc.fields.get("userId") {
        Some(Value::String(raw)) => raw == user_id,
        // Legacy rows imported with numeric ids; the typed index lookup
        // misses these, the scan does not.
        Some(Value::Number(n)) => n.to_string() == user_id,
        _ => false,
    }
}
