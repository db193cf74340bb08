use polyglot::{
    compile, explain, ir_from_json, ir_to_json, parse, render, targets, ComprehensionKind,
    Error, GeneratorSource, ParallelFlavor, Range, ReduceKind, RenderError, RenderOptions,
    StrategyRequest, TypeInfo,
};

// ═══════════════════════════════════════════════════════════════
//  Helpers
// ═══════════════════════════════════════════════════════════════

fn render_src(source: &str, target: &str, opts: RenderOptions) -> String {
    compile(source, target, &opts).expect("render failed")
}

fn parse_err(source: &str) -> String {
    match parse(source) {
        Err(Error::Parse(e)) => e.message,
        other => panic!("expected a parse error, got {:?}", other),
    }
}

/// Every option any renderer understands, with values valid wherever
/// they are read.
fn union_options() -> RenderOptions {
    RenderOptions::new()
        .parallel(true)
        .mode("auto")
        .explain(true)
        .unsafe_mode(false)
        .dialect("postgresql")
        .int_type("i64")
        .func_name("compute")
        .type_info(TypeInfo::default())
}

// ═══════════════════════════════════════════════════════════════
//  End-to-end scenarios
// ═══════════════════════════════════════════════════════════════

#[test]
fn test_list_of_squares_to_rust() {
    let ir = parse("[x**2 for x in range(5)]").unwrap();
    assert_eq!(ir.kind, ComprehensionKind::List);
    assert_eq!(ir.generators.len(), 1);
    let gen = &ir.generators[0];
    assert_eq!(gen.var, "x");
    assert_eq!(gen.source, GeneratorSource::Range(Range::new(0, 5, 1)));
    assert!(gen.filters.is_empty());
    assert_eq!(ir.element.as_deref(), Some("x**2"));

    let out = render("rust", &ir, &RenderOptions::new()).unwrap();
    assert!(out.contains("-> Vec<i32>"));
    assert!(out.contains(".map(|x| x.pow(2))"));
    assert!(out.contains(".collect()"));
}

#[test]
fn test_filtered_sum_to_sql() {
    let ir = parse("sum(x*x for x in range(1,100) if x%3==0)").unwrap();
    assert_eq!(ir.kind, ComprehensionKind::Generator);
    assert_eq!(ir.reduce_kind(), Some(ReduceKind::Sum));
    assert_eq!(ir.generators[0].filters, vec!["x%3==0".to_string()]);

    let out = render("sql", &ir, &RenderOptions::new()).unwrap();
    assert!(out.contains("SUM(x * x)"));
    assert!(out.contains("WHERE x % 3 = 0"));
}

#[test]
fn test_dict_to_linq() {
    let ir = parse("{i: i*i for i in range(1,6) if i%2==1}").unwrap();
    assert_eq!(ir.kind, ComprehensionKind::Dict);
    assert_eq!(ir.key_expr.as_deref(), Some("i"));
    assert_eq!(ir.val_expr.as_deref(), Some("i*i"));

    let out = render("csharp", &ir, &RenderOptions::new()).unwrap();
    assert!(out.contains("Dictionary<int, int>"));
    assert!(out.contains(".Where(i => i % 2 == 1)"));
    assert!(out.contains(".GroupBy(i => i, i => i * i)"));
    assert!(out.contains(".ToDictionary(g => g.Key, g => g.Last())"));
}

#[test]
fn test_sum_int_parallel_is_granted() {
    let ir = parse("sum(x for x in range(100))").unwrap();
    let request = StrategyRequest {
        op_kind: Some("sum".to_string()),
        elem_type: "Int".to_string(),
        parallel_requested: true,
        ..StrategyRequest::default()
    };
    let decision = explain(&ir, &request);
    assert!(matches!(decision.flavor, ParallelFlavor::ThreadLocalPartials(_)));
    assert_eq!(decision.flavor.name(), "thread-local-partials");
    assert!(decision.explanation().contains("thread-local partials"));
}

#[test]
fn test_max_string_parallel_is_denied() {
    let ir = parse("max(x for x in range(100))").unwrap();
    let request = StrategyRequest {
        op_kind: Some("max".to_string()),
        elem_type: "String".to_string(),
        parallel_requested: true,
        ..StrategyRequest::default()
    };
    let decision = explain(&ir, &request);
    assert_eq!(decision.flavor, ParallelFlavor::Sequential);
    assert!(decision.explanation().contains("String"));
}

#[test]
fn test_unknown_target_lists_all_six() {
    let ir = parse("[x for x in range(3)]").unwrap();
    let err = render("made-up-target", &ir, &RenderOptions::new()).unwrap_err();
    match &err {
        Error::Render(RenderError::InvalidTarget { target, known }) => {
            assert_eq!(target, "made-up-target");
            assert_eq!(known, &["csharp", "go", "julia", "rust", "sql", "ts"]);
        }
        other => panic!("expected InvalidTarget, got {:?}", other),
    }
    assert!(err
        .to_string()
        .contains("known targets: csharp, go, julia, rust, sql, ts"));
}

// ═══════════════════════════════════════════════════════════════
//  Dispatch
// ═══════════════════════════════════════════════════════════════

#[test]
fn test_union_of_options_accepted_everywhere() {
    let sources = [
        "[x**2 for x in range(5)]",
        "{x % 3 for x in range(9)}",
        "{i: i*i for i in range(1, 6)}",
        "sum(x*x for x in range(1, 100) if x%3==0)",
        "any(x > 3 for x in range(10))",
        "[(i, j) for i in range(3) for j in range(2)]",
    ];
    for source in sources {
        let ir = parse(source).unwrap();
        for target in targets() {
            let out = render(target, &ir, &union_options());
            assert!(out.is_ok(), "{} failed on '{}': {:?}", target, source, out);
        }
    }
}

#[test]
fn test_int_type_spellings_shared_by_rust_and_csharp() {
    let ir = parse("sum(x for x in range(10))").unwrap();
    for spelling in ["i64", "long", "int", "i32", "u8", "byte"] {
        let opts = RenderOptions::new().int_type(spelling);
        for target in targets() {
            let out = render(target, &ir, &opts);
            assert!(out.is_ok(), "{} rejected int_type '{}': {:?}", target, spelling, out);
        }
    }
    let csharp = render("csharp", &ir, &RenderOptions::new().int_type("i64")).unwrap();
    assert!(csharp.contains("public static long Execute()"));
}

#[test]
fn test_invalid_value_still_rejected() {
    let ir = parse("[x for x in range(3)]").unwrap();
    let opts = RenderOptions::new().func_name("not an identifier");
    let err = render("rust", &ir, &opts).unwrap_err();
    assert!(matches!(err, Error::Render(RenderError::InvalidOption { .. })));
}

#[test]
fn test_render_is_deterministic() {
    let ir = parse("{i: i*i for i in range(1, 6)}").unwrap();
    for target in targets() {
        let first = render(target, &ir, &union_options()).unwrap();
        let second = render(target, &ir, &union_options()).unwrap();
        assert_eq!(first, second, "{} output differs between calls", target);
    }
}

#[test]
fn test_concurrent_renders_agree() {
    let ir = parse("sum(x*x for x in range(1, 100) if x%3==0)").unwrap();
    let expected = render("julia", &ir, &union_options()).unwrap();
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let ir = ir.clone();
            std::thread::spawn(move || render("julia", &ir, &union_options()).unwrap())
        })
        .collect();
    for handle in handles {
        assert_eq!(handle.join().unwrap(), expected);
    }
}

// ═══════════════════════════════════════════════════════════════
//  IR JSON
// ═══════════════════════════════════════════════════════════════

#[test]
fn test_ir_json_round_trip() {
    let ir = parse("p = prod(v for v in values if v != 0)").unwrap();
    let json = ir_to_json(&ir).unwrap();
    assert!(json.contains("\"__type__\": \"IRComp\""));
    assert!(json.contains("\"__type__\": \"IRReduce\""));
    assert_eq!(ir_from_json(&json).unwrap(), ir);
}

#[test]
fn test_ir_json_invalid_shape_rejected() {
    let json = r#"{"__type__": "IRComp", "kind": "list", "generators": [], "element": "x"}"#;
    let err = ir_from_json(json).unwrap_err();
    assert!(matches!(err, Error::Ir(_)));
    assert!(err.to_string().contains("no generators"));

    assert!(matches!(ir_from_json("{").unwrap_err(), Error::Json(_)));
}

// ═══════════════════════════════════════════════════════════════
//  Parse errors
// ═══════════════════════════════════════════════════════════════

#[test]
fn test_parse_errors_name_the_construct() {
    assert!(parse_err("sum(3)").contains("expects a generator expression"));
    assert!(parse_err("[a for (a, b) in pairs]").contains("destructuring"));
    assert!(parse_err("[x for x in range(n)]").contains("non-literal range bound"));
}

#[test]
fn test_parse_error_display_has_location() {
    let err = parse("[x for x in range(n)]").unwrap_err();
    assert!(err.to_string().starts_with("parse error at 1:"));
}

// ═══════════════════════════════════════════════════════════════
//  Degraded output
// ═══════════════════════════════════════════════════════════════

#[test]
fn test_degraded_outputs_are_annotated() {
    let prod = render_src("prod(x for x in range(1, 5))", "sql", RenderOptions::new());
    assert!(prod.contains("simplified"));

    let ts = render_src(
        "sum(v for v in values)",
        "ts",
        RenderOptions::new().parallel(true),
    );
    assert!(ts.contains("simplified"));
}

#[test]
fn test_floor_semantics_over_negative_range() {
    let ir = parse("[x // 2 + x % 3 for x in range(-3, 3)]").unwrap();
    let julia = render("julia", &ir, &RenderOptions::new().mode("loops")).unwrap();
    assert!(julia.contains("fld(x, 2) + mod(x, 3)"));
    assert!(!julia.contains("÷"));

    let rust = render("rust", &ir, &RenderOptions::new()).unwrap();
    assert!(rust.contains("x.div_euclid(2) + x.rem_euclid(3)"));

    for target in ["go", "csharp", "ts", "sql"] {
        let out = render(target, &ir, &RenderOptions::new()).unwrap();
        assert!(out.contains("(x % 3 + 3) % 3"), "{} truncates x % 3", target);
    }
}

#[test]
fn test_nested_generators_render_for_every_target() {
    let ir = parse("[(i, j) for i in range(3) for j in range(2) if i != j]").unwrap();
    for target in targets() {
        let out = render(target, &ir, &RenderOptions::new()).unwrap();
        assert!(!out.contains("simplified"), "{} degraded nested output", target);
    }
}
