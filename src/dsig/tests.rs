use base64::{Engine, engine::general_purpose::STANDARD as BASE64};

use crate::crypto::rsa::{RsaPrivateKey, RsaSignature};
use crate::dsig::signer::{SignatureRequest, XmlSigner};
use crate::dsig::{Error, SignatureAlgorithm, algorithms, c14n};
use crate::xml::Document;

const KEY_PEM: &[u8] = include_bytes!("../../test_certs/identity/rsa2048.pem");
const CERT_DER: &[u8] = include_bytes!("../../test_certs/identity/x509.der");
const CERT_PEM: &[u8] = include_bytes!("../../test_certs/identity/x509.pem");

fn signer_with_key() -> XmlSigner {
    let mut signer = XmlSigner::new();
    signer.load_private_key(KEY_PEM, None).unwrap();
    signer
}

fn enveloped_request(doc: &Document) -> SignatureRequest {
    let target = doc.element_by_id("x").unwrap();
    SignatureRequest {
        target,
        insertion_parent: target,
        insertion_anchor: None,
    }
}

#[test]
fn test_signature_structure() {
    let mut doc = Document::parse(r#"<root><Data ID="x">payload</Data></root>"#).unwrap();
    let signer = signer_with_key();

    let request = enveloped_request(&doc);
    let result = signer.sign(&mut doc, &request).unwrap();

    assert_eq!(result.reference_id, "x");
    let signed = doc.text();
    assert!(signed.contains(r#"<Signature xmlns="http://www.w3.org/2000/09/xmldsig#">"#));
    assert!(signed.contains("<SignedInfo>"));
    assert!(signed.contains(r##"<Reference URI="#x">"##));
    assert!(signed.contains(algorithms::ENVELOPED_SIGNATURE));
    assert!(signed.contains(algorithms::EXCLUSIVE_C14N));
    assert!(signed.contains(algorithms::RSA_SHA1));
    assert!(signed.contains(algorithms::SHA1));
    assert!(signed.contains("<DigestValue>"));
    assert!(signed.contains("<SignatureValue>"));
    // No certificate loaded, no KeyInfo.
    assert!(!signed.contains("KeyInfo"));

    // The signature went inside the signed element, after its content.
    assert!(signed.contains("payload<Signature"));
}

#[test]
fn test_transform_chain_order() {
    let mut doc = Document::parse(r#"<root><Data ID="x">payload</Data></root>"#).unwrap();
    let signer = signer_with_key();

    let request = enveloped_request(&doc);
    let result = signer.sign(&mut doc, &request).unwrap();

    let enveloped = result
        .signature_xml
        .find(algorithms::ENVELOPED_SIGNATURE)
        .unwrap();
    let transforms_end = result.signature_xml.find("</Transforms>").unwrap();
    let c14n_in_transforms = result.signature_xml[..transforms_end]
        .rfind(algorithms::EXCLUSIVE_C14N)
        .unwrap();
    assert!(enveloped < c14n_in_transforms);
}

#[test]
fn test_sign_without_key_fails_without_mutation() {
    let mut doc = Document::parse(r#"<root><Data ID="x">payload</Data></root>"#).unwrap();
    let original = doc.text().to_owned();
    let signer = XmlSigner::new();

    let request = enveloped_request(&doc);
    let result = signer.sign(&mut doc, &request);

    assert!(matches!(result, Err(Error::NoPrivateKey)));
    assert_eq!(doc.text(), original);
}

#[test]
fn test_missing_reference_id_fails_without_mutation() {
    let mut doc = Document::parse(r#"<root><Data>payload</Data></root>"#).unwrap();
    let original = doc.text().to_owned();
    let signer = signer_with_key();

    let target = doc.element_by_name("Data").unwrap();
    let request = SignatureRequest {
        target,
        insertion_parent: target,
        insertion_anchor: None,
    };
    let result = signer.sign(&mut doc, &request);

    assert!(matches!(result, Err(Error::MissingReferenceId { element }) if element == "Data"));
    assert_eq!(doc.text(), original);
}

#[test]
fn test_custom_id_attribute() {
    let mut doc =
        Document::parse(r#"<root><Data RequestID="r9">payload</Data></root>"#).unwrap();
    let signer = signer_with_key().with_id_attribute("RequestID");

    let target = doc.element_by_name("Data").unwrap();
    let request = SignatureRequest {
        target,
        insertion_parent: target,
        insertion_anchor: None,
    };
    let result = signer.sign(&mut doc, &request).unwrap();

    assert_eq!(result.reference_id, "r9");
    assert!(doc.text().contains(r##"<Reference URI="#r9">"##));
}

#[test]
fn test_key_and_certificate_load_once() {
    let mut signer = signer_with_key();
    assert!(matches!(
        signer.load_private_key(KEY_PEM, None),
        Err(Error::KeyAlreadyLoaded)
    ));

    signer.load_certificate(CERT_DER).unwrap();
    assert!(matches!(
        signer.load_certificate(CERT_DER),
        Err(Error::CertificateAlreadyLoaded)
    ));
}

#[test]
fn test_keyinfo_carries_base64_der() {
    let mut doc = Document::parse(r#"<root><Data ID="x">payload</Data></root>"#).unwrap();
    let mut signer = signer_with_key();
    // PEM input must end up as the same base64 DER as the DER fixture.
    signer.load_certificate(CERT_PEM).unwrap();

    let request = enveloped_request(&doc);
    let result = signer.sign(&mut doc, &request).unwrap();

    let sig_doc = Document::parse(result.signature_xml.clone()).unwrap();
    let cert_node = sig_doc.element_by_name("X509Certificate").unwrap();
    assert_eq!(sig_doc.text_of(cert_node).unwrap(), BASE64.encode(CERT_DER));
    assert!(result.signature_xml.contains("<KeyInfo><X509Data>"));
}

#[test]
fn test_digest_matches_canonical_target() {
    let source = r#"<root xmlns:a="http://a/"><Data ID="x"><a:v>payload</a:v></Data></root>"#;
    let mut doc = Document::parse(source).unwrap();
    let signer = signer_with_key();

    // Compute the expected digest from the pre-signing canonical form.
    let target = doc.element_by_id("x").unwrap();
    let subtree = doc.subtree(target).unwrap();
    let ambient = doc.namespace_scope(target).unwrap();
    let canonical = c14n::canonicalize(&subtree, &ambient, None).unwrap();
    let expected = BASE64.encode(
        SignatureAlgorithm::RsaSha1
            .hash_alg()
            .hash(canonical.as_bytes())
            .unwrap(),
    );

    let request = enveloped_request(&doc);
    let result = signer.sign(&mut doc, &request).unwrap();

    let sig_doc = Document::parse(result.signature_xml).unwrap();
    let digest_node = sig_doc.element_by_name("DigestValue").unwrap();
    assert_eq!(sig_doc.text_of(digest_node).unwrap(), expected);
}

#[test]
fn test_digest_recomputable_from_signed_document() {
    // Signature inserted as a sibling: the target subtree is unchanged in
    // the mutated document and must still hash to the recorded digest.
    let mut doc =
        Document::parse(r#"<Envelope><Data ID="x">payload</Data></Envelope>"#).unwrap();
    let signer = signer_with_key();

    let request = SignatureRequest {
        target: doc.element_by_id("x").unwrap(),
        insertion_parent: doc.root(),
        insertion_anchor: None,
    };
    let result = signer.sign(&mut doc, &request).unwrap();

    let target = doc.element_by_id("x").unwrap();
    let subtree = doc.subtree(target).unwrap();
    let ambient = doc.namespace_scope(target).unwrap();
    let canonical = c14n::canonicalize(&subtree, &ambient, None).unwrap();
    let recomputed = BASE64.encode(
        SignatureAlgorithm::RsaSha1
            .hash_alg()
            .hash(canonical.as_bytes())
            .unwrap(),
    );

    let sig_doc = Document::parse(result.signature_xml).unwrap();
    let digest_node = sig_doc.element_by_name("DigestValue").unwrap();
    assert_eq!(sig_doc.text_of(digest_node).unwrap(), recomputed);
}

#[test]
fn test_repeated_signing_is_stable() {
    let source = r#"<root><Data ID="x">payload</Data></root>"#;
    let signer = signer_with_key();

    let mut doc_a = Document::parse(source).unwrap();
    let request_a = enveloped_request(&doc_a);
    let result_a = signer.sign(&mut doc_a, &request_a).unwrap();
    let mut doc_b = Document::parse(source).unwrap();
    let request_b = enveloped_request(&doc_b);
    let result_b = signer.sign(&mut doc_b, &request_b).unwrap();

    // PKCS#1 v1.5 is deterministic: identical digests and values.
    assert_eq!(result_a.signature_xml, result_b.signature_xml);
    assert_eq!(doc_a.text(), doc_b.text());
}

#[test]
fn test_signature_value_verifies() {
    let mut doc = Document::parse(r#"<root><Data ID="x">payload</Data></root>"#).unwrap();
    let signer = signer_with_key();
    let request = enveloped_request(&doc);
    let result = signer.sign(&mut doc, &request).unwrap();

    // Re-canonicalize SignedInfo the way a verifier would: extracted from
    // the signature with the xmldsig namespace inherited from <Signature>.
    let sig_doc = Document::parse(result.signature_xml).unwrap();
    let signed_info = sig_doc.element_by_name("SignedInfo").unwrap();
    let subtree = sig_doc.subtree(signed_info).unwrap();
    let ambient = sig_doc.namespace_scope(signed_info).unwrap();
    assert_eq!(
        ambient.get(""),
        Some(&"http://www.w3.org/2000/09/xmldsig#".to_string())
    );
    let canonical = c14n::canonicalize(&subtree, &ambient, None).unwrap();

    let key = RsaPrivateKey::from_pem(KEY_PEM).unwrap();
    let public_key = key.public_key().unwrap();
    let value_node = sig_doc.element_by_name("SignatureValue").unwrap();
    let signature_bytes = BASE64
        .decode(sig_doc.text_of(value_node).unwrap())
        .unwrap();
    let signature = RsaSignature::new(key.key_size(), signature_bytes);

    let valid = crate::crypto::rsa::verify(
        &public_key,
        canonical.as_bytes(),
        &signature,
        SignatureAlgorithm::RsaSha1.hash_alg(),
    )
    .unwrap();
    assert!(valid);

    // Any change to the signed bytes must break verification.
    let tampered = canonical.replace("#x", "#y");
    let valid = crate::crypto::rsa::verify(
        &public_key,
        tampered.as_bytes(),
        &signature,
        SignatureAlgorithm::RsaSha1.hash_alg(),
    )
    .unwrap();
    assert!(!valid);
}

#[test]
fn test_tampered_target_no_longer_matches_digest() {
    let mut doc = Document::parse(r#"<root><Data ID="x">payload</Data></root>"#).unwrap();
    let signer = signer_with_key();
    let request = enveloped_request(&doc);
    let result = signer.sign(&mut doc, &request).unwrap();

    let sig_doc = Document::parse(result.signature_xml).unwrap();
    let digest_node = sig_doc.element_by_name("DigestValue").unwrap();
    let recorded = sig_doc.text_of(digest_node).unwrap();

    let tampered_doc =
        Document::parse(r#"<root><Data ID="x">Payload</Data></root>"#).unwrap();
    let target = tampered_doc.element_by_id("x").unwrap();
    let canonical = c14n::canonicalize(
        &tampered_doc.subtree(target).unwrap(),
        &tampered_doc.namespace_scope(target).unwrap(),
        None,
    )
    .unwrap();
    let tampered = BASE64.encode(
        SignatureAlgorithm::RsaSha1
            .hash_alg()
            .hash(canonical.as_bytes())
            .unwrap(),
    );
    assert_ne!(recorded, tampered);
}

#[test]
fn test_anchor_controls_insertion_position() {
    let source = r#"<Envelope><Data ID="x">payload</Data><Trailer/></Envelope>"#;
    let signer = signer_with_key();

    // With an anchor: immediately before it, siblings untouched.
    let mut doc = Document::parse(source).unwrap();
    let request = SignatureRequest {
        target: doc.element_by_id("x").unwrap(),
        insertion_parent: doc.root(),
        insertion_anchor: doc.element_by_name("Trailer"),
    };
    signer.sign(&mut doc, &request).unwrap();
    let signed = doc.text();
    let data_end = signed.find("</Data>").unwrap();
    let sig_start = signed.find("<Signature").unwrap();
    let trailer = signed.find("<Trailer").unwrap();
    assert!(data_end < sig_start && sig_start < trailer);

    // Without an anchor: appended as last child.
    let mut doc = Document::parse(source).unwrap();
    let request = SignatureRequest {
        target: doc.element_by_id("x").unwrap(),
        insertion_parent: doc.root(),
        insertion_anchor: None,
    };
    signer.sign(&mut doc, &request).unwrap();
    let signed = doc.text();
    let trailer = signed.find("<Trailer").unwrap();
    let sig_start = signed.find("<Signature").unwrap();
    assert!(trailer < sig_start);
    assert!(signed.ends_with("</Envelope>"));
}

#[test]
fn test_cross_document_target_rejected() {
    let other = Document::parse(r#"<root><Data ID="x">payload</Data></root>"#).unwrap();
    let mut doc = Document::parse(r#"<root><Data ID="x">payload</Data></root>"#).unwrap();
    let original = doc.text().to_owned();
    let signer = signer_with_key();

    let request = SignatureRequest {
        target: other.element_by_id("x").unwrap(),
        insertion_parent: doc.root(),
        insertion_anchor: None,
    };
    let result = signer.sign(&mut doc, &request);

    assert!(matches!(
        result,
        Err(Error::Xml(crate::xml::Error::DetachedNode))
    ));
    assert_eq!(doc.text(), original);
}

#[test]
fn test_sha256_algorithm_pair() {
    let mut doc = Document::parse(r#"<root><Data ID="x">payload</Data></root>"#).unwrap();
    let mut signer = XmlSigner::new().with_algorithm(SignatureAlgorithm::RsaSha256);
    signer.load_private_key(KEY_PEM, None).unwrap();

    let request = enveloped_request(&doc);
    let result = signer.sign(&mut doc, &request).unwrap();

    assert!(result.signature_xml.contains(algorithms::RSA_SHA256));
    assert!(result.signature_xml.contains(algorithms::SHA256));
    assert!(!result.signature_xml.contains(algorithms::RSA_SHA1));

    let sig_doc = Document::parse(result.signature_xml).unwrap();
    let digest_node = sig_doc.element_by_name("DigestValue").unwrap();
    let digest = BASE64.decode(sig_doc.text_of(digest_node).unwrap()).unwrap();
    assert_eq!(digest.len(), 32);
}

#[test]
fn test_encrypted_key_via_passphrase() {
    let mut doc = Document::parse(r#"<root><Data ID="x">payload</Data></root>"#).unwrap();
    let mut signer = XmlSigner::new();
    signer
        .load_private_key(
            include_bytes!("../../test_certs/identity/rsa2048_encrypted.pem"),
            Some("changeit"),
        )
        .unwrap();

    // Same key as the plaintext fixture, so the output is identical.
    let request = enveloped_request(&doc);
    let result = signer.sign(&mut doc, &request).unwrap();
    let mut doc_plain = Document::parse(r#"<root><Data ID="x">payload</Data></root>"#).unwrap();
    let request_plain = enveloped_request(&doc_plain);
    let result_plain = signer_with_key()
        .sign(&mut doc_plain, &request_plain)
        .unwrap();
    assert_eq!(result.signature_xml, result_plain.signature_xml);
}

#[test]
fn test_wrong_passphrase_fails() {
    let mut signer = XmlSigner::new();
    let result = signer.load_private_key(
        include_bytes!("../../test_certs/identity/rsa2048_encrypted.pem"),
        Some("wrong"),
    );
    assert!(matches!(result, Err(Error::Crypto(_))));
    assert!(!signer.has_private_key());
}
