//! Splits one inbound bid request into per-bidder projections.
//!
//! Each projected request is a deep copy whose impressions carry only that
//! bidder's parameters (plus the generic `prebid` envelope), with the
//! bidder's known user id injected when consent allows. Bidders without
//! usable consent are dropped before any of their data leaves the process.

use {
    crate::{
        error::ExchangeError,
        oracles::{IdFetcher, Permissions},
    },
    model::{ext::ExtRequestPrebid, ext::ExtUser, BidRequest, BidderName, Imp, User},
    serde_json::{Map, Value},
    std::collections::{BTreeSet, HashMap},
};

/// Imp extension keys that never name a bidder.
const NON_BIDDER_IMP_EXT_KEYS: &[&str] = &["prebid", "context"];

pub struct CleanResult {
    pub requests: HashMap<BidderName, BidRequest>,
    /// Alias name -> adapter it resolves to.
    pub aliases: HashMap<String, String>,
    pub errors: Vec<ExchangeError>,
}

/// Discovers the requested bidders and builds one narrowed request per
/// bidder that is allowed to participate.
pub async fn clean_openrtb_requests(
    request: &BidRequest,
    prebid: &ExtRequestPrebid,
    usersyncs: &dyn IdFetcher,
    permissions: &dyn Permissions,
    vendor_ids: &HashMap<BidderName, u16>,
    usersync_if_ambiguous: bool,
) -> CleanResult {
    let mut errors = Vec::new();
    let aliases = prebid.aliases.clone();

    // Per imp: the bidder-keyed parameter objects and the preserved generic
    // envelope.
    let mut imp_params: Vec<HashMap<String, Value>> = Vec::with_capacity(request.imp.len());
    let mut imp_envelopes: Vec<Option<Value>> = Vec::with_capacity(request.imp.len());
    let mut bidders: BTreeSet<String> = BTreeSet::new();
    for imp in &request.imp {
        let (params, envelope) = match parse_imp_ext(imp) {
            Ok(parsed) => parsed,
            Err(err) => {
                errors.push(err);
                (HashMap::new(), None)
            }
        };
        bidders.extend(params.keys().cloned());
        imp_params.push(params);
        imp_envelopes.push(envelope);
    }

    let consent = consent_string(request);

    let mut requests = HashMap::new();
    for bidder in bidders {
        let core = aliases.get(&bidder).cloned().unwrap_or_else(|| bidder.clone());
        let core_name = BidderName::from(core.as_str());
        let vendor_id = vendor_ids.get(&core_name).copied().unwrap_or(0);

        let allowed = match &consent {
            None => usersync_if_ambiguous,
            Some(consent) => match permissions.allow_personal_info(vendor_id, consent).await {
                Ok(allowed) => allowed,
                Err(err) => {
                    errors.push(ExchangeError::Unknown(format!(
                        "failed to evaluate consent for bidder {bidder}: {err:#}"
                    )));
                    false
                }
            },
        };
        if !allowed {
            continue;
        }

        match project_request(request, &bidder, &core_name, &imp_params, &imp_envelopes, usersyncs) {
            Ok(Some(projected)) => {
                requests.insert(BidderName::from(bidder.as_str()), projected);
            }
            Ok(None) => {}
            Err(err) => errors.push(err),
        }
    }

    CleanResult {
        requests,
        aliases,
        errors,
    }
}

/// Splits `imp.ext` into bidder parameter objects and the generic envelope.
fn parse_imp_ext(imp: &Imp) -> Result<(HashMap<String, Value>, Option<Value>), ExchangeError> {
    let Some(ext) = &imp.ext else {
        return Ok((HashMap::new(), None));
    };
    let parsed: Map<String, Value> = serde_json::from_str(ext.get()).map_err(|err| {
        ExchangeError::BadInput(format!("imp \"{}\" has malformed ext: {err}", imp.id))
    })?;
    let mut params = HashMap::new();
    let mut envelope = None;
    for (key, value) in parsed {
        if key == "prebid" {
            envelope = Some(value);
        } else if !NON_BIDDER_IMP_EXT_KEYS.contains(&key.as_str()) {
            params.insert(key, value);
        }
    }
    Ok((params, envelope))
}

fn consent_string(request: &BidRequest) -> Option<String> {
    let ext = request.user.as_ref()?.ext.as_ref()?;
    let parsed: ExtUser = serde_json::from_str(ext.get()).ok()?;
    parsed.consent.filter(|consent| !consent.is_empty())
}

/// Builds the deep copy for one bidder, or `None` when no impression names
/// it.
fn project_request(
    request: &BidRequest,
    bidder: &str,
    core: &BidderName,
    imp_params: &[HashMap<String, Value>],
    imp_envelopes: &[Option<Value>],
    usersyncs: &dyn IdFetcher,
) -> Result<Option<BidRequest>, ExchangeError> {
    let mut imps = Vec::new();
    for (index, imp) in request.imp.iter().enumerate() {
        let Some(params) = imp_params[index].get(bidder) else {
            continue;
        };
        let mut ext = Map::new();
        if let Some(envelope) = &imp_envelopes[index] {
            ext.insert("prebid".to_string(), envelope.clone());
        }
        ext.insert(bidder.to_string(), params.clone());
        let raw = serde_json::value::to_raw_value(&Value::Object(ext)).map_err(|err| {
            ExchangeError::Unknown(format!("failed to rebuild imp ext for {bidder}: {err}"))
        })?;
        let mut imp = imp.clone();
        imp.ext = Some(raw);
        imps.push(imp);
    }
    if imps.is_empty() {
        return Ok(None);
    }

    let mut projected = request.clone();
    projected.imp = imps;
    if let Some(id) = usersyncs.get_id(core) {
        let user = projected.user.get_or_insert_with(User::default);
        if user.buyeruid.is_none() {
            user.buyeruid = Some(id);
        }
    }
    Ok(Some(projected))
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::oracles::{AlwaysAllow, MockIdFetcher, MockPermissions, NoSyncs},
        serde_json::{json, value::RawValue},
    };

    fn raw(value: Value) -> Option<Box<RawValue>> {
        Some(serde_json::value::to_raw_value(&value).unwrap())
    }

    fn request_with_bidders() -> BidRequest {
        BidRequest {
            id: "req".to_string(),
            imp: vec![
                Imp {
                    id: "1".to_string(),
                    ext: raw(json!({
                        "prebid": {"is_rewarded": true},
                        "alpha": {"placement": 7},
                        "beta": {"zone": "a"},
                    })),
                    ..Default::default()
                },
                Imp {
                    id: "2".to_string(),
                    ext: raw(json!({"alpha": {"placement": 9}})),
                    ..Default::default()
                },
            ],
            ..Default::default()
        }
    }

    async fn clean(request: &BidRequest, ambiguous: bool) -> CleanResult {
        clean_openrtb_requests(
            request,
            &ExtRequestPrebid::default(),
            &NoSyncs,
            &AlwaysAllow,
            &HashMap::new(),
            ambiguous,
        )
        .await
    }

    #[tokio::test]
    async fn narrows_imp_ext_per_bidder() {
        let result = clean(&request_with_bidders(), true).await;
        assert!(result.errors.is_empty());
        assert_eq!(result.requests.len(), 2);

        let alpha = &result.requests[&BidderName::from("alpha")];
        assert_eq!(alpha.imp.len(), 2);
        let ext: Value = serde_json::from_str(alpha.imp[0].ext.as_ref().unwrap().get()).unwrap();
        assert_eq!(ext, json!({"prebid": {"is_rewarded": true}, "alpha": {"placement": 7}}));

        let beta = &result.requests[&BidderName::from("beta")];
        assert_eq!(beta.imp.len(), 1);
        let ext: Value = serde_json::from_str(beta.imp[0].ext.as_ref().unwrap().get()).unwrap();
        assert_eq!(ext, json!({"prebid": {"is_rewarded": true}, "beta": {"zone": "a"}}));
    }

    #[tokio::test]
    async fn cleaned_requests_do_not_share_imps() {
        let result = clean(&request_with_bidders(), true).await;
        let alpha = &result.requests[&BidderName::from("alpha")];
        let beta = &result.requests[&BidderName::from("beta")];
        // Both projected the same imp; each copy carries only its own params.
        assert_ne!(
            alpha.imp[0].ext.as_ref().unwrap().get(),
            beta.imp[0].ext.as_ref().unwrap().get()
        );
    }

    #[tokio::test]
    async fn malformed_imp_ext_is_reported_not_fatal() {
        let mut request = request_with_bidders();
        request.imp[1].ext = Some(RawValue::from_string("[1,2]".to_string()).unwrap());
        let result = clean(&request, true).await;
        assert_eq!(result.errors.len(), 1);
        assert!(matches!(result.errors[0], ExchangeError::BadInput(_)));
        // Imp 1 still produced both bidders.
        assert_eq!(result.requests.len(), 2);
        assert_eq!(result.requests[&BidderName::from("alpha")].imp.len(), 1);
    }

    #[tokio::test]
    async fn absent_consent_drops_bidders_unless_ambiguous_syncs_allowed() {
        let result = clean(&request_with_bidders(), false).await;
        assert!(result.requests.is_empty());

        let result = clean(&request_with_bidders(), true).await;
        assert_eq!(result.requests.len(), 2);
    }

    #[tokio::test]
    async fn denied_consent_drops_the_bidder() {
        let mut request = request_with_bidders();
        request.user = Some(User {
            ext: raw(json!({"consent": "consent-string"})),
            ..Default::default()
        });

        let mut permissions = MockPermissions::new();
        permissions
            .expect_allow_personal_info()
            .returning(|vendor_id, _| Ok(vendor_id == 7));
        let vendor_ids = HashMap::from([
            (BidderName::from("alpha"), 7),
            (BidderName::from("beta"), 8),
        ]);

        let result = clean_openrtb_requests(
            &request,
            &ExtRequestPrebid::default(),
            &NoSyncs,
            &permissions,
            &vendor_ids,
            false,
        )
        .await;
        assert_eq!(result.requests.len(), 1);
        assert!(result.requests.contains_key(&BidderName::from("alpha")));
    }

    #[tokio::test]
    async fn aliases_resolve_to_core_adapter() {
        let mut request = request_with_bidders();
        request.imp[0].ext = raw(json!({"gamma": {"x": 1}}));
        request.imp[1].ext = None;
        let prebid = ExtRequestPrebid {
            aliases: HashMap::from([("gamma".to_string(), "alpha".to_string())]),
            ..Default::default()
        };

        let mut usersyncs = MockIdFetcher::new();
        usersyncs
            .expect_get_id()
            .withf(|bidder| bidder.as_str() == "alpha")
            .returning(|_| Some("uid-123".to_string()));

        let result = clean_openrtb_requests(
            &request,
            &prebid,
            &usersyncs,
            &AlwaysAllow,
            &HashMap::new(),
            true,
        )
        .await;
        assert_eq!(result.requests.len(), 1);
        let gamma = &result.requests[&BidderName::from("gamma")];
        assert_eq!(gamma.user.as_ref().unwrap().buyeruid.as_deref(), Some("uid-123"));
        assert_eq!(result.aliases["gamma"], "alpha");
    }
}
