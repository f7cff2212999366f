use chrono::NaiveDate;
use criterion::{Criterion, black_box, criterion_group, criterion_main};
use rust_decimal_macros::dec;

use erechnung::cii;
use erechnung::codes::CodeListResolver;
use erechnung::core::*;
use erechnung::erp::{ChargeType, ErpTaxRow};
use erechnung::normalize::normalize;
use erechnung::tax::{TaxContext, aggregate};

fn test_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 6, 15).unwrap()
}

fn build_invoice(lines: usize) -> Invoice {
    let mut builder = InvoiceBuilder::new("BENCH-001", test_date())
        .due_date(test_date() + chrono::Duration::days(30))
        .buyer_reference("04011000-12345-34")
        .seller(
            PartyBuilder::new("Benchmark GmbH")
                .address(
                    AddressBuilder::new("DE")
                        .street("Hauptstr. 1")
                        .postcode("10115")
                        .city("Berlin")
                        .build(),
                )
                .tax_id("DE123456789")
                .electronic_address("EM", "rechnung@benchmark.de")
                .contact(Contact {
                    name: Some("Max Mustermann".into()),
                    department: None,
                    phone: Some("+49 30 12345".into()),
                    fax: None,
                    email: Some("max@benchmark.de".into()),
                })
                .build(),
        )
        .buyer(
            PartyBuilder::new("Kunde AG")
                .address(
                    AddressBuilder::new("DE")
                        .street("Leopoldstr. 42")
                        .postcode("80331")
                        .city("München")
                        .build(),
                )
                .electronic_address("0204", "04011000-12345-34")
                .build(),
        )
        .payment_means(PaymentMeans {
            type_code: "58".into(),
            iban: Some("DE89370400440532013000".into()),
            account_name: None,
            bic: None,
        });

    for i in 1..=lines {
        let rate = if i % 3 == 0 { dec!(7) } else { dec!(19) };
        builder = builder.add_line(
            LineItemBuilder::new(i.to_string(), format!("Item {i}"), dec!(2), "C62", dec!(9.99))
                .tax(TaxCategory::StandardRate, rate)
                .seller_product_id(format!("ART-{i:05}"))
                .build(),
        );
    }

    builder.build().unwrap()
}

fn bench_build_invoice(c: &mut Criterion) {
    c.bench_function("build_invoice_10_lines", |b| {
        b.iter(|| black_box(build_invoice(10)));
    });
}

fn bench_invariants(c: &mut Criterion) {
    let invoice = build_invoice(10);
    c.bench_function("check_invariants", |b| {
        b.iter(|| black_box(check_invariants(black_box(&invoice))));
    });
}

fn bench_normalize_1000_lines(c: &mut Criterion) {
    let mut invoice = build_invoice(1000);
    for line in invoice.lines.iter_mut().step_by(2) {
        line.net_price = -line.net_price;
    }
    c.bench_function("normalize_1000_lines", |b| {
        b.iter(|| {
            let mut lines = invoice.lines.clone();
            normalize(black_box(&mut lines));
            black_box(lines)
        });
    });
}

fn bench_tax_aggregate(c: &mut Criterion) {
    let rows: Vec<ErpTaxRow> = [(dec!(19), dec!(1900)), (dec!(7), dec!(70))]
        .into_iter()
        .map(|(rate, tax)| ErpTaxRow {
            charge_type: ChargeType::OnNetTotal,
            account_head: Some(format!("USt {rate}% - BM")),
            account_tax_rate: None,
            description: format!("USt {rate}%"),
            rate,
            tax_amount: tax,
            total: dec!(11000) + tax,
            net_amount: None,
        })
        .collect();
    let resolver = CodeListResolver::new();
    let ctx = TaxContext {
        profile: Profile::En16931,
        net_total: dec!(11000),
        tax_category: None,
        taxes_and_charges: None,
        resolver: &resolver,
        tolerance: dec!(0.01),
        rounding_scale: 2,
    };
    c.bench_function("tax_aggregate", |b| {
        b.iter(|| black_box(aggregate(black_box(&rows), &[], black_box(&ctx))));
    });
}

fn bench_cii_serialize(c: &mut Criterion) {
    let invoice = build_invoice(10);
    c.bench_function("cii_serialize", |b| {
        b.iter(|| black_box(cii::to_cii_xml(black_box(&invoice), Profile::XRechnung)));
    });
}

fn bench_cii_parse(c: &mut Criterion) {
    let xml = cii::to_cii_xml(&build_invoice(10), Profile::XRechnung).unwrap();
    c.bench_function("cii_parse", |b| {
        b.iter(|| black_box(cii::from_cii_xml(black_box(&xml))));
    });
}

fn bench_detect_profile(c: &mut Criterion) {
    let xml = cii::to_cii_xml(&build_invoice(1000), Profile::En16931).unwrap();
    c.bench_function("detect_profile_1000_lines", |b| {
        b.iter(|| black_box(cii::detect_profile(black_box(&xml))));
    });
}

fn bench_cii_serialize_1000_lines(c: &mut Criterion) {
    let invoice = build_invoice(1000);
    c.bench_function("cii_serialize_1000_lines", |b| {
        b.iter(|| black_box(cii::to_cii_xml(black_box(&invoice), Profile::Extended)));
    });
}

fn bench_cii_parse_1000_lines(c: &mut Criterion) {
    let xml = cii::to_cii_xml(&build_invoice(1000), Profile::Extended).unwrap();
    c.bench_function("cii_parse_1000_lines", |b| {
        b.iter(|| black_box(cii::from_cii_xml(black_box(&xml))));
    });
}

criterion_group!(
    benches,
    bench_build_invoice,
    bench_invariants,
    bench_normalize_1000_lines,
    bench_tax_aggregate,
    bench_cii_serialize,
    bench_cii_parse,
    bench_detect_profile,
    bench_cii_serialize_1000_lines,
    bench_cii_parse_1000_lines,
);
criterion_main!(benches);
