use crate::error::ErrorSlot;
use crate::models::{HelpItem, MemberStatus, UserIdentity};
use crate::services::circle_collection;
use crate::sync::subscriber::ScopedSubscription;
use crate::sync::writer::{FieldPolicy, OptimisticWriter};
use kinring_backend::{Fields, QuerySpec, Store};
use serde_json::json;

pub const EXCHANGE_WINDOW: usize = 10;

/// Fields a help offer/request may carry to the store. Catalog entries come
/// straight from the selector UI, which decorates them with component
/// references; only these survive.
pub const SAFE_HELP_FIELDS: &[&str] = &["id", "label", "emoji", "createdBy", "createdByRole"];

#[derive(Debug, Clone, Copy)]
pub struct MatchPair {
    pub offer_id: &'static str,
    pub request_id: &'static str,
    pub celebration: &'static str,
}

#[derive(Debug, Clone, Copy)]
pub struct StatusMatch {
    pub status_id: &'static str,
    pub request_id: &'static str,
    pub celebration: &'static str,
}

pub const MATCH_PAIRS: &[MatchPair] = &[
    MatchPair {
        offer_id: "groceries",
        request_id: "groceries",
        celebration: "Groceries are covered",
    },
    MatchPair {
        offer_id: "ride",
        request_id: "ride",
        celebration: "A ride is arranged",
    },
    MatchPair {
        offer_id: "visit",
        request_id: "visit",
        celebration: "A visit is planned",
    },
    MatchPair {
        offer_id: "cooking",
        request_id: "meal",
        celebration: "Dinner is taken care of",
    },
];

pub const STATUS_MATCHES: &[StatusMatch] = &[
    StatusMatch {
        status_id: "coffee_ready",
        request_id: "coffee",
        celebration: "Coffee is ready",
    },
    StatusMatch {
        status_id: "available",
        request_id: "call",
        celebration: "Someone is free for a call",
    },
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    OfferRequest,
    StatusRequest,
}

#[derive(Debug, Clone)]
pub struct ActiveMatch {
    pub kind: MatchKind,
    pub offer: Option<HelpItem>,
    pub request: HelpItem,
    pub celebration: &'static str,
    /// True when offer and request came from different roles.
    pub cross_family: bool,
}

/// Pure derivation of active matches from the two mirrors plus the member
/// statuses. Cross-family matches sort first; the sort is stable so source
/// order is otherwise preserved.
pub fn detect_matches(
    offers: &[HelpItem],
    requests: &[HelpItem],
    statuses: &[MemberStatus],
) -> Vec<ActiveMatch> {
    let mut matches = Vec::new();

    for pair in MATCH_PAIRS {
        let offer = offers
            .iter()
            .find(|item| item.catalog_id.as_deref() == Some(pair.offer_id));
        let request = requests
            .iter()
            .find(|item| item.catalog_id.as_deref() == Some(pair.request_id));
        if let (Some(offer), Some(request)) = (offer, request) {
            let cross_family = match (offer.created_by_role, request.created_by_role) {
                (Some(a), Some(b)) => a != b,
                _ => false,
            };
            matches.push(ActiveMatch {
                kind: MatchKind::OfferRequest,
                offer: Some(offer.clone()),
                request: request.clone(),
                celebration: pair.celebration,
                cross_family,
            });
        }
    }

    for pair in STATUS_MATCHES {
        let status_live = statuses.iter().any(|status| status.status == pair.status_id);
        let request = requests
            .iter()
            .find(|item| item.catalog_id.as_deref() == Some(pair.request_id));
        if let (true, Some(request)) = (status_live, request) {
            matches.push(ActiveMatch {
                kind: MatchKind::StatusRequest,
                offer: None,
                request: request.clone(),
                celebration: pair.celebration,
                cross_family: false,
            });
        }
    }

    matches.sort_by_key(|m| !m.cross_family);
    matches
}

/// Help offers and requests are two independent channels; their snapshots do
/// not arrive atomically together and carry no cross-ordering guarantee.
pub struct HelpExchangeService {
    identity: UserIdentity,
    offers_collection: Option<String>,
    requests_collection: Option<String>,
    offers: ScopedSubscription<HelpItem>,
    requests: ScopedSubscription<HelpItem>,
    writer: OptimisticWriter,
    errors: ErrorSlot,
}

impl HelpExchangeService {
    pub fn new(store: &Store, identity: UserIdentity, circle_id: Option<&str>) -> Self {
        let errors = ErrorSlot::default();
        let offers_collection = circle_id.map(|id| circle_collection(id, "helpOffers"));
        let requests_collection = circle_id.map(|id| circle_collection(id, "helpRequests"));
        let spec = QuerySpec {
            order_field: Some("createdAt"),
            limit: Some(EXCHANGE_WINDOW),
            filter_equal: None,
        };
        let offers = ScopedSubscription::open(
            store,
            offers_collection.clone(),
            spec.clone(),
            errors.clone(),
            HelpItem::from_document,
        );
        let requests = ScopedSubscription::open(
            store,
            requests_collection.clone(),
            spec,
            errors.clone(),
            HelpItem::from_document,
        );
        Self {
            writer: OptimisticWriter::new(store.clone(), errors.clone()),
            identity,
            offers_collection,
            requests_collection,
            offers,
            requests,
            errors,
        }
    }

    pub fn add_offer(&self, item: Fields) -> Option<String> {
        let collection = self.offers_collection.as_ref()?;
        Some(self.writer.create(
            collection,
            "offer",
            self.with_author(item),
            FieldPolicy::Allow(SAFE_HELP_FIELDS),
            "createdAt",
        ))
    }

    pub fn add_request(&self, item: Fields) -> Option<String> {
        let collection = self.requests_collection.as_ref()?;
        Some(self.writer.create(
            collection,
            "request",
            self.with_author(item),
            FieldPolicy::Allow(SAFE_HELP_FIELDS),
            "createdAt",
        ))
    }

    pub fn remove_offer(&self, doc_id: &str) {
        if let Some(collection) = &self.offers_collection {
            self.writer.delete(collection, doc_id);
        }
    }

    pub fn remove_request(&self, doc_id: &str) {
        if let Some(collection) = &self.requests_collection {
            self.writer.delete(collection, doc_id);
        }
    }

    pub fn offers(&self) -> Vec<HelpItem> {
        self.offers.items()
    }

    pub fn requests(&self) -> Vec<HelpItem> {
        self.requests.items()
    }

    pub fn matches(&self, statuses: &[MemberStatus]) -> Vec<ActiveMatch> {
        detect_matches(&self.offers(), &self.requests(), statuses)
    }

    pub fn top_match(&self, statuses: &[MemberStatus]) -> Option<ActiveMatch> {
        self.matches(statuses).into_iter().next()
    }

    pub fn loading(&self) -> bool {
        self.offers.loading() || self.requests.loading()
    }

    pub fn errors(&self) -> ErrorSlot {
        self.errors.clone()
    }

    fn with_author(&self, item: Fields) -> Fields {
        let mut fields = item;
        fields.insert("createdBy".to_string(), json!(self.identity.user_id));
        fields.insert(
            "createdByRole".to_string(),
            json!(self.identity.role.as_str()),
        );
        fields
    }
}
