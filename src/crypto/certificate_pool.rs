//
// Copyright 2024 The Sigstore Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! A collection of trusted CA certificates for certificate path validation.

use webpki::types::{CertificateDer, TrustAnchor, UnixTime};
use webpki::{EndEntityCert, KeyUsage, VerifiedPath};

// DER value of the id-kp-codeSigning OID (1.3.6.1.5.5.7.3.3). Issued signing
// certificates must carry this extended key usage.
const CODE_SIGNING_OID: &[u8] = &[43, 6, 1, 5, 5, 7, 3, 3];

/// A pool of trusted root certificates plus the intermediates needed to
/// build a path from an end-entity certificate up to one of them.
pub(crate) struct CertificatePool {
    trusted_roots: Vec<TrustAnchor<'static>>,
    intermediates: Vec<CertificateDer<'static>>,
}

impl CertificatePool {
    /// Builds a pool from DER-encoded certificates. Self-issued certificates
    /// become trust anchors; everything else is kept as an intermediate.
    pub(crate) fn from_certificates<R, I>(
        trusted_roots: R,
        intermediates: I,
    ) -> Result<Self, webpki::Error>
    where
        R: IntoIterator<Item = CertificateDer<'static>>,
        I: IntoIterator<Item = CertificateDer<'static>>,
    {
        let mut anchors = Vec::new();
        let mut intermediate_certs: Vec<CertificateDer<'static>> = Vec::new();

        for cert in trusted_roots {
            match webpki::anchor_from_trusted_cert(&cert) {
                Ok(anchor) => anchors.push(anchor.to_owned()),
                Err(e) => {
                    // A CA chain entry that cannot anchor may still serve as
                    // an intermediate.
                    tracing::debug!("not a trust anchor ({e:?}), keeping as intermediate");
                    intermediate_certs.push(cert.clone());
                }
            }
        }
        intermediate_certs.extend(intermediates);

        if anchors.is_empty() {
            return Err(webpki::Error::UnknownIssuer);
        }

        Ok(CertificatePool {
            trusted_roots: anchors,
            intermediates: intermediate_certs,
        })
    }

    /// Ensures the given end-entity certificate chains up to one of the
    /// trusted roots at `verification_time`, and was issued for code
    /// signing.
    pub(crate) fn verify_cert_with_time(
        &self,
        cert_der: &CertificateDer,
        verification_time: UnixTime,
    ) -> Result<(), webpki::Error> {
        let cert = EndEntityCert::try_from(cert_der)?;
        self.verified_path(&cert, verification_time).map(|_| ())
    }

    fn verified_path<'a, 'cert>(
        &'a self,
        cert: &'cert EndEntityCert<'cert>,
        verification_time: UnixTime,
    ) -> Result<VerifiedPath<'cert>, webpki::Error>
    where
        'a: 'cert,
    {
        cert.verify_for_usage(
            webpki::ALL_VERIFICATION_ALGS,
            &self.trusted_roots,
            &self.intermediates,
            verification_time,
            KeyUsage::required(CODE_SIGNING_OID),
            None,
            None,
        )
    }
}
