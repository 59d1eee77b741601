use criterion::{black_box, criterion_group, criterion_main, Criterion};
use nacl_parser::parse;

const SAMPLE: &str = r#"
type salesforce.Account {
    _required = true
    string Name {
        label = "Account name"
        _required = true
    }
    number Revenue {}
    list<salesforce.Tag> tags {}
}

type salesforce.Tag {
    string value {}
}

salesforce.Account prod {
    Name = "Main account"
    Revenue = 1000000
    tags = [
        { value = "enterprise" },
        { value = "priority" }
    ]
    owner = salesforce.User.instance.admin
}

vars {
    region = "us-east-1"
}
"#;

fn bench_parse(c: &mut Criterion) {
    c.bench_function("parse_sample_document", |b| {
        b.iter(|| parse("bench.nacl", black_box(SAMPLE)))
    });
}

criterion_group!(benches, bench_parse);
criterion_main!(benches);
