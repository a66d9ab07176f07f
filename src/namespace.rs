/// Namespaces
///
/// CAIP-2 chain ids (`eip155:1`) and CAIP-10 accounts
/// (`eip155:1:0xab..`) grouped under a namespace key. A key is either a
/// bare namespace (`eip155`) listing its chains, or a single chain id.
///
use std::collections::BTreeSet;
use std::str::FromStr;

use alloy::primitives::Address;

use crate::error::{Error, Result};
use crate::types::{Namespace, Namespaces};

fn is_namespace(s: &str) -> bool {
    (3..=8).contains(&s.len())
        && s.bytes()
            .all(|b| b == b'-' || b.is_ascii_lowercase() || b.is_ascii_digit())
}

fn is_reference(s: &str) -> bool {
    (1..=32).contains(&s.len())
        && s.bytes()
            .all(|b| b == b'-' || b == b'_' || b.is_ascii_alphanumeric())
}

fn split_chain(chain_id: &str) -> Option<(&str, &str)> {
    let (namespace, reference) = chain_id.split_once(':')?;
    (is_namespace(namespace) && is_reference(reference))
        .then_some((namespace, reference))
}

/// `eip155:1:0xab..` -> `eip155:1`
pub fn account_chain(account: &str) -> Option<&str> {
    let (chain, _) = account.rsplit_once(':')?;
    split_chain(chain).map(|_| chain)
}

fn validate_account(account: &str) -> Result<()> {
    let invalid = || Error::InvalidNamespace(format!("bad account {account}"));
    let chain = account_chain(account).ok_or_else(invalid)?;
    let address = &account[chain.len() + 1..];
    if address.is_empty() || address.len() > 128 {
        return Err(invalid());
    }
    if chain.starts_with("eip155:") {
        Address::from_str(address).map_err(|_| invalid())?;
    }
    Ok(())
}

/// Namespace part of a key (`eip155` for both `eip155` and `eip155:1`).
pub fn namespace_of(key: &str) -> &str {
    key.split(':').next().unwrap_or(key)
}

/// Every chain a namespace entry grants, including chains implied by its
/// accounts.
pub fn chains_of(key: &str, namespace: &Namespace) -> BTreeSet<String> {
    if key.contains(':') {
        return BTreeSet::from([key.to_string()]);
    }
    namespace
        .chains
        .iter()
        .cloned()
        .chain(
            namespace
                .accounts
                .iter()
                .filter_map(|a| account_chain(a))
                .map(str::to_string),
        )
        .collect()
}

pub fn validate(namespaces: &Namespaces) -> Result<()> {
    for (key, namespace) in namespaces {
        let prefix = if key.contains(':') {
            let (prefix, _) = split_chain(key).ok_or_else(|| {
                Error::InvalidNamespace(format!("bad chain key {key}"))
            })?;
            if !namespace.chains.is_empty()
                && namespace.chains.iter().any(|c| c != key)
            {
                return Err(Error::InvalidNamespace(format!(
                    "{key} lists foreign chains"
                )));
            }
            prefix
        } else {
            if !is_namespace(key) {
                return Err(Error::InvalidNamespace(format!(
                    "bad namespace key {key}"
                )));
            }
            key.as_str()
        };

        for chain in &namespace.chains {
            match split_chain(chain) {
                Some((ns, _)) if ns == prefix => {}
                _ => {
                    return Err(Error::InvalidNamespace(format!(
                        "chain {chain} does not belong to {key}"
                    )));
                }
            }
        }

        for account in &namespace.accounts {
            validate_account(account)?;
            if namespace_of(account) != prefix {
                return Err(Error::InvalidNamespace(format!(
                    "account {account} does not belong to {key}"
                )));
            }
        }
    }
    Ok(())
}

/// Checks that `approved` grants every chain, method and event listed in
/// `required`.
pub fn ensure_satisfies(required: &Namespaces, approved: &Namespaces) -> Result<()> {
    for (key, wanted) in required {
        let prefix = namespace_of(key);

        let mut chains = BTreeSet::new();
        let mut methods = BTreeSet::new();
        let mut events = BTreeSet::new();
        for (approved_key, granted) in approved {
            if namespace_of(approved_key) != prefix {
                continue;
            }
            chains.extend(chains_of(approved_key, granted));
            methods.extend(granted.methods.iter().map(String::as_str));
            events.extend(granted.events.iter().map(String::as_str));
        }

        if chains.is_empty() && methods.is_empty() && events.is_empty() {
            return Err(Error::NamespaceMismatch(format!(
                "namespace {prefix} not approved"
            )));
        }
        if let Some(chain) =
            chains_of(key, wanted).into_iter().find(|c| !chains.contains(c))
        {
            return Err(Error::NamespaceMismatch(format!(
                "chain {chain} not approved"
            )));
        }
        if let Some(method) =
            wanted.methods.iter().find(|m| !methods.contains(m.as_str()))
        {
            return Err(Error::NamespaceMismatch(format!(
                "method {method} not approved"
            )));
        }
        if let Some(event) =
            wanted.events.iter().find(|e| !events.contains(e.as_str()))
        {
            return Err(Error::NamespaceMismatch(format!(
                "event {event} not approved"
            )));
        }
    }
    Ok(())
}

fn entries_for<'a>(
    namespaces: &'a Namespaces,
    chain_id: &'a str,
) -> impl Iterator<Item = &'a Namespace> + 'a {
    namespaces
        .iter()
        .filter(move |(key, ns)| chains_of(key, ns).contains(chain_id))
        .map(|(_, ns)| ns)
}

pub fn authorize_method(
    namespaces: &Namespaces,
    chain_id: &str,
    method: &str,
) -> Result<()> {
    if entries_for(namespaces, chain_id)
        .any(|ns| ns.methods.iter().any(|m| m == method))
    {
        Ok(())
    } else {
        Err(Error::UnauthorizedMethod {
            chain_id: chain_id.to_string(),
            method: method.to_string(),
        })
    }
}

pub fn authorize_event(
    namespaces: &Namespaces,
    chain_id: &str,
    event: &str,
) -> Result<()> {
    if entries_for(namespaces, chain_id)
        .any(|ns| ns.events.iter().any(|e| e == event))
    {
        Ok(())
    } else {
        Err(Error::UnauthorizedEvent {
            chain_id: chain_id.to_string(),
            event: event.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ACCOUNT: &str = "eip155:1:0x0000000000000000000000000000000000000123";

    fn required() -> Namespaces {
        Namespaces::from([(
            "eip155".to_string(),
            Namespace::new(
                ["eip155:1"],
                ["personal_sign"],
                ["chainChanged"],
            ),
        )])
    }

    fn approved(chains: &[&str]) -> Namespaces {
        let accounts: Vec<String> = chains
            .iter()
            .map(|c| format!("{c}:0x0000000000000000000000000000000000000123"))
            .collect();
        Namespaces::from([(
            "eip155".to_string(),
            Namespace::new(
                chains.iter().copied(),
                ["personal_sign", "eth_sendTransaction"],
                ["chainChanged", "accountsChanged"],
            )
            .with_accounts(accounts),
        )])
    }

    #[test]
    fn superset_satisfies() {
        let approved = approved(&["eip155:1", "eip155:137"]);
        validate(&approved).unwrap();
        ensure_satisfies(&required(), &approved).unwrap();
    }

    #[test]
    fn missing_chain_is_a_mismatch() {
        let err = ensure_satisfies(&required(), &approved(&["eip155:137"]))
            .unwrap_err();
        assert!(matches!(err, Error::NamespaceMismatch(m) if m.contains("eip155:1")));
    }

    #[test]
    fn missing_method_or_namespace_is_a_mismatch() {
        let mut approved = approved(&["eip155:1"]);
        approved.get_mut("eip155").unwrap().methods.clear();
        assert!(matches!(
            ensure_satisfies(&required(), &approved),
            Err(Error::NamespaceMismatch(_))
        ));
        assert!(matches!(
            ensure_satisfies(&required(), &Namespaces::new()),
            Err(Error::NamespaceMismatch(_))
        ));
    }

    #[test]
    fn chain_keyed_entries_count() {
        let approved = Namespaces::from([(
            "eip155:1".to_string(),
            Namespace::new(
                Vec::<String>::new(),
                ["personal_sign"],
                ["chainChanged"],
            )
            .with_accounts([ACCOUNT]),
        )]);
        validate(&approved).unwrap();
        ensure_satisfies(&required(), &approved).unwrap();
        authorize_method(&approved, "eip155:1", "personal_sign").unwrap();
    }

    #[test]
    fn method_and_event_authorization() {
        let approved = approved(&["eip155:1"]);
        authorize_method(&approved, "eip155:1", "personal_sign").unwrap();
        authorize_event(&approved, "eip155:1", "accountsChanged").unwrap();

        assert!(matches!(
            authorize_method(&approved, "eip155:1", "eth_signTypedData"),
            Err(Error::UnauthorizedMethod { .. })
        ));
        assert!(matches!(
            authorize_method(&approved, "eip155:10", "personal_sign"),
            Err(Error::UnauthorizedMethod { .. })
        ));
        assert!(matches!(
            authorize_event(&approved, "eip155:1", "disconnect"),
            Err(Error::UnauthorizedEvent { .. })
        ));
    }

    #[test]
    fn malformed_namespaces_are_rejected() {
        let bad_chain = Namespaces::from([(
            "eip155".to_string(),
            Namespace::new(["solana:1"], ["personal_sign"], ["chainChanged"]),
        )]);
        assert!(matches!(validate(&bad_chain), Err(Error::InvalidNamespace(_))));

        let bad_account = Namespaces::from([(
            "eip155".to_string(),
            Namespace::new(["eip155:1"], ["personal_sign"], ["chainChanged"])
                .with_accounts(["eip155:1:0x1234"]),
        )]);
        assert!(matches!(
            validate(&bad_account),
            Err(Error::InvalidNamespace(_))
        ));

        let bad_key = Namespaces::from([("E".to_string(), Namespace::default())]);
        assert!(matches!(validate(&bad_key), Err(Error::InvalidNamespace(_))));
    }

    #[test]
    fn account_chain_parsing() {
        assert_eq!(account_chain(ACCOUNT), Some("eip155:1"));
        assert_eq!(account_chain("eip155"), None);
    }
}
