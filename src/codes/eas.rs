//! Electronic Address Scheme (EAS) codes for BT-34 / BT-49.
//!
//! Covers the schemes seen in German and EU invoicing; the full list is
//! maintained by the CEF and has a few hundred entries.

/// Check whether `code` is a known EAS scheme identifier.
pub fn is_known_eas_code(code: &str) -> bool {
    EAS_CODES.binary_search(&code).is_ok()
}

/// Sorted for binary search.
static EAS_CODES: &[&str] = &[
    "0002", // System Information et Repertoire des Entreprise et des Etablissements (SIRENE)
    "0007", // Organisationsnummer (Swedish legal entities)
    "0009", // SIRET-CODE
    "0037", // LY-tunnus (Finnish OVT)
    "0060", // Data Universal Numbering System (D-U-N-S Number)
    "0088", // Global Location Number (GLN)
    "0096", // DANISH CHAMBER OF COMMERCE Scheme
    "0106", // Vereniging van Kamers van Koophandel (Dutch KvK)
    "0130", // Directorates of the European Commission
    "0135", // SIA Object Identifiers
    "0151", // Australian Business Number (ABN)
    "0183", // Numéro d'identification suisse des entreprises (IDE)
    "0184", // DIGSTORG
    "0188", // Corporate Number of The Social Security and Tax Number System
    "0190", // Dutch Originator's Identification Number
    "0192", // Enhetsregisteret ved Brønnøysundregisterne (Norwegian Org number)
    "0195", // Singapore UEN identifier
    "0196", // Kennitala (Iceland)
    "0198", // ERSTORG
    "0204", // Leitweg-ID
    "0208", // Numero d'entreprise / ondernemingsnummer (Belgian enterprise number)
    "0209", // GS1 identification keys
    "0210", // Codice Fiscale
    "0211", // Partita IVA
    "0212", // Finnish Organization Identifier
    "0213", // Finnish Organization Value Add Tax Identifier
    "0215", // Net service ID
    "0216", // OVTcode
    "9901", // Danish Ministry of the Interior and Health
    "9906", // Italian VAT number
    "9910", // Hungary VAT number
    "9914", // Austrian VAT number
    "9915", // Austrian Verwaltungs- und Organisationsbezeichner
    "9918", // SOCIETY FOR WORLDWIDE INTERBANK FINANCIAL, TELECOMMUNICATION S.W.I.F.T
    "9919", // Kennziffer des Unternehmensregisters
    "9920", // Agencia Española de Administración Tributaria
    "9925", // Belgian VAT number
    "9930", // German VAT number
    "9944", // Dutch VAT number
    "9957", // French VAT number
    "9958", // German Leitweg-ID (legacy)
    "AN",   // O.F.T.P. (ODETTE File Transfer Protocol)
    "AQ",   // X.400 address for mail text
    "AS",   // AS2 exchange
    "AU",   // File Transfer Protocol
    "EM",   // Electronic mail
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eas_codes_are_sorted() {
        for window in EAS_CODES.windows(2) {
            assert!(
                window[0] < window[1],
                "EAS codes not sorted: {:?} >= {:?}",
                window[0],
                window[1]
            );
        }
    }

    #[test]
    fn common_schemes_known() {
        assert!(is_known_eas_code("EM"));
        assert!(is_known_eas_code("0204"));
        assert!(is_known_eas_code("9930"));
        assert!(!is_known_eas_code("XX"));
    }
}
