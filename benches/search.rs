use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use sheetsearch_rs::sample::sample_video_database;
use sheetsearch_rs::{SearchSettings, Sheet, SheetFilter, SheetIndex, annotate};

/// The sample sheet cloned `copies` times under distinct ids.
fn replicated_sheets(copies: usize) -> Vec<Sheet> {
    let template = sample_video_database();
    (0..copies)
        .map(|copy| {
            let mut sheet = template.clone();
            sheet.id = format!("{}_{copy}", template.id);
            sheet.name = format!("{} #{copy}", template.name);
            sheet
        })
        .collect()
}

fn bench_index_build(c: &mut Criterion) {
    let settings = SearchSettings::default();
    for copies in [1usize, 50, 500] {
        let sheets = replicated_sheets(copies);
        c.bench_with_input(BenchmarkId::new("index_build", copies * 20), &sheets, |b, sheets| {
            b.iter(|| {
                let index = SheetIndex::build(sheets, &settings).expect("valid settings");
                black_box(index.len());
            });
        });
    }
}

fn bench_queries(c: &mut Criterion) {
    let settings = SearchSettings::default();
    let index = SheetIndex::build(&replicated_sheets(500), &settings).expect("valid settings");
    const QUERIES: &[&str] = &["adobe", "photoshp", "creative cloud", "2024"];
    for &query in QUERIES {
        c.bench_with_input(BenchmarkId::new("query", query), &query, |b, &query| {
            b.iter(|| {
                let results = index.search(query, &SheetFilter::All, settings.max_results);
                black_box(results.len());
            });
        });
    }
}

fn bench_highlight(c: &mut Criterion) {
    let text = "Web design principles and techniques using Photoshop, see https://helpx.adobe.com/photoshop/web";
    c.bench_function("annotate::mixed_text", |b| {
        b.iter(|| black_box(annotate(text, "photoshop web design", true)));
    });
}

criterion_group!(benches, bench_index_build, bench_queries, bench_highlight);
criterion_main!(benches);
