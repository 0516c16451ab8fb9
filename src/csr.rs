use rcgen::{CertificateParams, DistinguishedName, DnType, DnValue, KeyPair};

use crate::Error;

pub const NODE_COMMON_NAME_PREFIX: &str = "system:node:";
pub const NODE_ORGANIZATION: &str = "system:nodes";

/// Builds the DER encoding of a PKCS#10 request signed with `key_pair` (ECDSA with SHA-256).
///
/// The control plane only auto-approves node client requests whose subject is exactly
/// `O=system:nodes, CN=system:node:<name>` and which carry no DNS or IP alternative names.
pub fn build_request(key_pair: &KeyPair, agent_name: &str) -> Result<Vec<u8>, Error> {
    let mut dn = DistinguishedName::new();
    dn.push(
        DnType::OrganizationName,
        DnValue::Utf8String(NODE_ORGANIZATION.to_string()),
    );
    dn.push(
        DnType::CommonName,
        DnValue::Utf8String(format!("{NODE_COMMON_NAME_PREFIX}{agent_name}")),
    );

    let mut params = CertificateParams::default();
    params.distinguished_name = dn;
    params.subject_alt_names.clear();

    let csr = params
        .serialize_request(key_pair)
        .map_err(Error::SigningError)?;
    Ok(csr.der().to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use x509_parser::{
        certification_request::X509CertificationRequest, extensions::ParsedExtension,
        prelude::FromDer,
    };

    #[test]
    fn test_node_subject_shape() {
        let key = KeyPair::generate().unwrap();
        for name in ["node-1", "ip-10-0-0-12.ec2.internal", "worker"] {
            let der = build_request(&key, name).unwrap();
            let (_, csr) = X509CertificationRequest::from_der(&der).unwrap();
            let subject = &csr.certification_request_info.subject;

            let cn: Vec<_> = subject
                .iter_common_name()
                .map(|x| x.as_str().unwrap().to_string())
                .collect();
            assert_eq!(cn, vec![format!("system:node:{name}")]);

            let org: Vec<_> = subject
                .iter_organization()
                .map(|x| x.as_str().unwrap().to_string())
                .collect();
            assert_eq!(org, vec!["system:nodes".to_string()]);

            let has_san = csr
                .requested_extensions()
                .map(|mut x| x.any(|e| matches!(e, ParsedExtension::SubjectAlternativeName(_))))
                .unwrap_or_default();
            assert!(!has_san);
        }
    }

    #[test]
    fn test_signed_by_supplied_key() {
        let key = KeyPair::generate().unwrap();
        let der = build_request(&key, "node-1").unwrap();
        let (_, csr) = X509CertificationRequest::from_der(&der).unwrap();

        csr.verify_signature().unwrap();
        assert_eq!(
            &*csr.certification_request_info.subject_pki.subject_public_key.data,
            key.public_key_raw()
        );
        assert_eq!(
            csr.signature_algorithm.algorithm,
            x509_parser::oid_registry::OID_SIG_ECDSA_WITH_SHA256
        );
    }
}
