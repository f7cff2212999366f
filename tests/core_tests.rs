mod common;

use common::*;
use config::{File, FileFormat};
use erechnung::codes::*;
use erechnung::core::*;
use erechnung::erp::{ChargeType, ErpTaxRow, project};
use erechnung::normalize::normalize;
use erechnung::settings::{FailureAction, PolicyDecision, Settings, Trigger};
use erechnung::tax::{TaxContext, aggregate};
use rust_decimal_macros::dec;

fn seller() -> Party {
    PartyBuilder::new("ACME GmbH")
        .address(
            AddressBuilder::new("DE")
                .street("Friedrichstraße 123")
                .postcode("10115")
                .city("Berlin")
                .build(),
        )
        .tax_id("DE123456789")
        .build()
}

fn buyer() -> Party {
    PartyBuilder::new("Kunde AG")
        .address(
            AddressBuilder::new("DE")
                .street("Marienplatz 1")
                .postcode("80331")
                .city("München")
                .build(),
        )
        .build()
}

// --- Builder ---

#[test]
fn domestic_invoice_totals() {
    let inv = InvoiceBuilder::new("RE-2024-001", date(2024, 6, 15))
        .due_date(date(2024, 7, 15))
        .seller(seller())
        .buyer(buyer())
        .add_line(
            LineItemBuilder::new("1", "Softwareentwicklung", dec!(80), "HUR", dec!(120))
                .tax(TaxCategory::StandardRate, dec!(19))
                .description("React Frontend")
                .build(),
        )
        .add_line(
            LineItemBuilder::new("2", "Fachbuch", dec!(1), "C62", dec!(49.90))
                .tax(TaxCategory::StandardRate, dec!(7))
                .build(),
        )
        .build()
        .unwrap();

    assert_eq!(inv.currency_code, "EUR");
    assert_eq!(inv.totals.line_total, dec!(9649.90));
    assert_eq!(inv.tax_summary.len(), 2);
    // 9600 * 19% + 49.90 * 7%
    assert_eq!(inv.totals.tax_total, dec!(1827.49));
    assert_eq!(inv.totals.grand_total, dec!(11477.39));
    assert_eq!(inv.totals.due_payable, inv.totals.grand_total);
    assert!(check_invariants(&inv).is_empty());
}

#[test]
fn seller_tax_id_is_classified() {
    let vat = PartyBuilder::new("A").tax_id("DE 123 456 789").build();
    assert_eq!(vat.tax_registration.unwrap().scheme, TaxScheme::Vat);

    let local = PartyBuilder::new("B").tax_id("30/123/45678").build();
    assert_eq!(local.tax_registration.unwrap().scheme, TaxScheme::Local);
}

#[test]
fn inconsistent_line_is_reported() {
    let mut inv = InvoiceBuilder::new("RE-2024-002", date(2024, 6, 15))
        .seller(seller())
        .buyer(buyer())
        .add_line(LineItemBuilder::new("1", "Artikel", dec!(2), "C62", dec!(50)).build())
        .build()
        .unwrap();
    inv.lines[0].line_total = dec!(99);

    let violations = check_invariants(&inv);
    assert_eq!(violations.len(), 1);
    assert!(violations[0].is_error());
    assert_eq!(violations[0].location.as_deref(), Some("lines[0].line_total"));
}

// --- Normalization ---

#[test]
fn credit_line_is_normalized() {
    let mut lines = vec![
        LineItemBuilder::new("1", "Rückgabe", dec!(2), "C62", dec!(-10)).build(),
        LineItemBuilder::new("2", "Gutschrift", dec!(-1), "C62", dec!(-5)).build(),
        LineItemBuilder::new("3", "Storno", dec!(0), "C62", dec!(-7)).build(),
    ];
    normalize(&mut lines);

    assert_eq!((lines[0].quantity, lines[0].net_price), (dec!(-2), dec!(10)));
    assert_eq!(lines[0].line_total, dec!(-20));
    assert_eq!((lines[1].quantity, lines[1].net_price), (dec!(1), dec!(5)));
    assert_eq!((lines[2].quantity, lines[2].net_price), (dec!(0), dec!(7)));
}

// --- Code lists ---

#[test]
fn most_specific_mapping_wins() {
    let r = CodeListResolver::new();
    r.insert(CodeList::Untdid5305, EntityRef::sales_taxes_template("EU"), "K");
    r.insert(CodeList::Untdid5305, EntityRef::account("Erlöse EU - AC"), "AE");

    let candidates = [
        EntityRef::item_tax_template("Standard"),
        EntityRef::account("Erlöse EU - AC"),
        EntityRef::sales_taxes_template("EU"),
    ];
    let res = r.resolve(Concept::TaxCategory, &candidates);
    assert_eq!(res.code(), Some("AE"));
    assert!(res.is_mapped());
}

#[test]
fn unit_list_default_applies_before_builtin_fallback() {
    let r = CodeListResolver::new();
    assert_eq!(r.resolve(Concept::UnitOfMeasure, &[EntityRef::uom("Stk")]), Resolution::Unresolved);
    assert_eq!(r.require(Concept::UnitOfMeasure, &[EntityRef::uom("Stk")]).unwrap(), "C62");

    r.set_default(CodeList::Rec20, "H87");
    assert_eq!(
        r.resolve(Concept::UnitOfMeasure, &[EntityRef::uom("Stk")]),
        Resolution::ListDefault {
            code: "H87".into(),
            list: CodeList::Rec20,
        }
    );
}

#[test]
fn builtin_fallbacks() {
    let r = CodeListResolver::new();
    assert_eq!(r.require(Concept::PaymentMeans, &[]).unwrap(), "ZZZ");
    assert_eq!(r.require(Concept::TaxCategory, &[]).unwrap(), "S");
    assert_eq!(r.require(Concept::VatExemptionReason, &[]).unwrap(), "vatex-eu-ae");
    assert!(matches!(
        r.require(
            Concept::ElectronicAddressScheme,
            &[EntityRef::address_scheme("Fax")]
        ),
        Err(EInvoiceError::ResolutionFailure { .. })
    ));
}

#[test]
fn reverse_lookup_prefers_rec20() {
    let r = CodeListResolver::new();
    r.insert(CodeList::Rec21, EntityRef::uom("Paket"), "XPK");
    r.insert(CodeList::Rec20, EntityRef::uom("Stück"), "XPK");

    assert_eq!(
        r.reverse(Concept::UnitOfMeasure, EntityKind::Uom, "XPK"),
        ReverseResolution::Existing(EntityRef::uom("Stück"))
    );
    assert_eq!(
        r.reverse(Concept::UnitOfMeasure, EntityKind::Uom, "KGM"),
        ReverseResolution::Placeholder { code: "KGM".into() }
    );
}

#[test]
fn mapping_table_from_json() {
    let table: MappingTable = serde_json::from_str(
        r#"{
            "mappings": [
                { "list": "Untdid4461", "entity": { "kind": "ModeOfPayment", "name": "Lastschrift" }, "code": "59" }
            ],
            "defaults": {}
        }"#,
    )
    .unwrap();
    let r = CodeListResolver::from_table(table);

    assert_eq!(
        r.resolve(Concept::PaymentMeans, &[EntityRef::mode_of_payment("Lastschrift")])
            .code(),
        Some("59")
    );
    assert_eq!(r.resolve(Concept::UnitOfMeasure, &[]), Resolution::Unresolved);
}

// --- Settings ---

#[test]
fn settings_from_json() {
    let settings = Settings::from_source(File::from_str(
        r#"{ "validate_on_save": false, "error_action_on_submit": "block", "approximation_tolerance": "0.05" }"#,
        FileFormat::Json,
    ))
    .unwrap();

    assert!(!settings.should_validate(Trigger::Save));
    assert_eq!(settings.action_for(Trigger::Submit), FailureAction::Block);
    assert_eq!(settings.approximation_tolerance, dec!(0.05));
    assert_eq!(settings.basis_rounding_scale, 2);

    let finding = Violation::error("Leitweg-ID fehlt").with_rule("BR-DE-15");
    assert_eq!(settings.decide(Trigger::Submit, &[finding.clone()]), PolicyDecision::Block);
    assert_eq!(settings.decide(Trigger::Save, &[finding]), PolicyDecision::Ignore);
    assert_eq!(
        settings.decide(Trigger::Submit, &[Violation::warning("Hinweis")]),
        PolicyDecision::Ignore
    );
}

// --- ERP projection and tax aggregation ---

#[test]
fn fixture_projects_for_xrechnung() {
    let erp = erp_invoice();
    let projection = project(&erp, Profile::XRechnung, &resolver()).unwrap();
    let inv = projection.invoice;

    assert_eq!(inv.number, "ACC-SINV-2024-00042");
    assert_eq!(inv.type_code, InvoiceTypeCode::Invoice);
    assert_eq!(inv.lines[0].unit_code, "HUR");
    assert_eq!(inv.lines[1].unit_code, "H87");
    assert_eq!(inv.lines[0].description.as_deref(), Some("Beratung vor Ort"));
    assert_eq!(inv.lines[0].tax.rate, dec!(19));
    assert_eq!(inv.buyer.electronic_address.unwrap().scheme, "0204");
    assert_eq!(inv.seller.electronic_address.unwrap().scheme, "EM");
    assert_eq!(inv.payment_means.as_ref().unwrap().type_code, "58");
    assert_eq!(inv.delivery_date, Some(date(2024, 6, 14)));
    assert!(inv.language.is_none());

    let term = &inv.payment_terms[0];
    assert!(
        term.description
            .as_deref()
            .unwrap()
            .contains("#SKONTO#TAGE=10#PROZENT=2.00#")
    );
    assert!(term.discount.is_none());
}

#[test]
fn xrechnung_requires_buyer_reference() {
    let mut erp = erp_invoice();
    erp.buyer_reference = Some("  ".into());
    let err = project(&erp, Profile::XRechnung, &resolver()).unwrap_err();
    assert!(matches!(err, EInvoiceError::MissingRequiredField { ref field } if field == "buyer_reference"));

    // other profiles do not route
    assert!(project(&erp, Profile::En16931, &resolver()).is_ok());
}

fn shipping_rows() -> Vec<ErpTaxRow> {
    vec![
        ErpTaxRow {
            charge_type: ChargeType::Actual,
            account_head: Some("Versandkosten - AC".into()),
            account_tax_rate: None,
            description: "Versand".into(),
            rate: dec!(0),
            tax_amount: dec!(10),
            total: dec!(1010),
            net_amount: None,
        },
        ErpTaxRow {
            charge_type: ChargeType::OnPreviousRowAmount,
            account_head: Some("USt 19% - AC".into()),
            account_tax_rate: None,
            description: "USt auf Versand".into(),
            rate: dec!(19),
            tax_amount: dec!(1.90),
            total: dec!(1011.90),
            net_amount: None,
        },
    ]
}

#[test]
fn flat_charge_rejected_in_basic() {
    let resolver = resolver();
    let ctx = TaxContext {
        profile: Profile::Basic,
        net_total: dec!(1000),
        tax_category: None,
        taxes_and_charges: None,
        resolver: &resolver,
        tolerance: dec!(0.01),
        rounding_scale: 2,
    };
    let err = aggregate(&shipping_rows(), &[], &ctx).unwrap_err();
    assert!(matches!(err, EInvoiceError::ProfileConstraintViolation { profile: Profile::Basic, .. }));
}

#[test]
fn flat_charge_becomes_service_charge_in_xrechnung() {
    let resolver = resolver();
    let ctx = TaxContext {
        profile: Profile::XRechnung,
        net_total: dec!(1000),
        tax_category: None,
        taxes_and_charges: None,
        resolver: &resolver,
        tolerance: dec!(0.01),
        rounding_scale: 2,
    };
    let out = aggregate(&shipping_rows(), &[], &ctx).unwrap();

    assert_eq!(out.service_charges.len(), 1);
    let charge = &out.service_charges[0];
    assert_eq!(charge.amount, dec!(10));
    assert_eq!(charge.applied_tax.as_ref().unwrap().rate, dec!(19));

    let row = &out.summary[0];
    assert_eq!(row.basis_amount, dec!(10));
    assert_eq!(row.calculated_amount, dec!(1.90));
    assert_eq!(row.basis_source, BasisSource::Direct);
}

#[test]
fn item_quantity_rows_are_unsupported() {
    let resolver = CodeListResolver::new();
    let ctx = TaxContext {
        profile: Profile::Extended,
        net_total: dec!(100),
        tax_category: None,
        taxes_and_charges: None,
        resolver: &resolver,
        tolerance: dec!(0.01),
        rounding_scale: 2,
    };
    let row = ErpTaxRow {
        charge_type: ChargeType::OnItemQuantity,
        account_head: None,
        account_tax_rate: None,
        description: "Pfand".into(),
        rate: dec!(0.25),
        tax_amount: dec!(2.50),
        total: dec!(102.50),
        net_amount: None,
    };
    let err = aggregate(&[row], &[], &ctx).unwrap_err();
    assert!(matches!(err, EInvoiceError::UnsupportedChargeType { row: 1, .. }));
}
