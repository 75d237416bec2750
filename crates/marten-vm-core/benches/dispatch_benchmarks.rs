//! Dispatch Performance Benchmarks
//!
//! Measures send and field access throughput across inline cache states and
//! with the reflection switch on and off.

use criterion::{Criterion, criterion_group, criterion_main};
use marten_vm_core::{
    Activation, Class, ClassDescriptor, Environment, Expr, FieldAccess, FieldSite, Interpreter,
    Method, PropertyDescriptor, ReflectiveOp, Universe, Value,
};
use std::hint::black_box;
use std::sync::Arc;

fn tagged_class(universe: &Universe, name: &str) -> Arc<Class> {
    let class = universe.install_class(ClassDescriptor::plain(name));
    class.install_method(Method::expression(
        "tag",
        0,
        Expr::literal(Value::symbol(name)),
    ));
    class
}

fn send_driver() -> Arc<Method> {
    Method::expression(
        "drive:",
        0,
        Expr::send("tag", Expr::read_argument(0), vec![]),
    )
}

/// Benchmark: monomorphic sends (one receiver class, cache hits throughout)
fn bench_monomorphic_send(c: &mut Criterion) {
    let universe = Universe::new();
    let interpreter = Interpreter::new(&universe);
    let class = tagged_class(&universe, "A");
    let receiver = Value::Object(universe.new_instance(&class).unwrap());
    let driver = send_driver();

    // Warm the site so measurement sees the steady state
    interpreter
        .run_method(&driver, Value::Nil, vec![receiver.clone()])
        .unwrap();

    c.bench_function("send_monomorphic", |b| {
        b.iter(|| {
            let result = interpreter
                .run_method(&driver, Value::Nil, vec![black_box(receiver.clone())])
                .unwrap();
            black_box(result)
        });
    });
}

/// Benchmark: polymorphic sends (three receiver classes through one site)
fn bench_polymorphic_send(c: &mut Criterion) {
    let universe = Universe::new();
    let interpreter = Interpreter::new(&universe);
    let receivers: Vec<Value> = ["A", "B", "C"]
        .iter()
        .map(|name| {
            let class = tagged_class(&universe, name);
            Value::Object(universe.new_instance(&class).unwrap())
        })
        .collect();
    let driver = send_driver();

    for receiver in &receivers {
        interpreter
            .run_method(&driver, Value::Nil, vec![receiver.clone()])
            .unwrap();
    }

    c.bench_function("send_polymorphic_3", |b| {
        b.iter(|| {
            for receiver in &receivers {
                let result = interpreter
                    .run_method(&driver, Value::Nil, vec![black_box(receiver.clone())])
                    .unwrap();
                black_box(result);
            }
        });
    });
}

/// Benchmark: megamorphic sends (more classes than the cache bound)
fn bench_megamorphic_send(c: &mut Criterion) {
    let universe = Universe::new();
    let interpreter = Interpreter::new(&universe);
    let receivers: Vec<Value> = (0..8)
        .map(|i| {
            let class = tagged_class(&universe, &format!("K{i}"));
            Value::Object(universe.new_instance(&class).unwrap())
        })
        .collect();
    let driver = send_driver();

    for receiver in &receivers {
        interpreter
            .run_method(&driver, Value::Nil, vec![receiver.clone()])
            .unwrap();
    }

    c.bench_function("send_megamorphic_8", |b| {
        b.iter(|| {
            for receiver in &receivers {
                let result = interpreter
                    .run_method(&driver, Value::Nil, vec![black_box(receiver.clone())])
                    .unwrap();
                black_box(result);
            }
        });
    });
}

/// Benchmark: cached field reads through one site
fn bench_field_read(c: &mut Criterion) {
    let universe = Universe::new();
    let interpreter = Interpreter::new(&universe);
    let class = universe.install_class(
        ClassDescriptor::plain("Point").with_property(PropertyDescriptor::boxed("x")),
    );
    let receiver = Value::Object(universe.new_instance(&class).unwrap());
    receiver
        .as_object()
        .unwrap()
        .set(universe.shapes(), "x", Value::integer(42))
        .unwrap();

    let frame = Activation::new(
        Method::primitive("bench", |_, _| Ok(Value::Nil)),
        Value::Nil,
        vec![],
    );
    let site = FieldSite::new("x", FieldAccess::Read);
    interpreter
        .read_field(&frame, &site, receiver.clone())
        .unwrap();

    c.bench_function("field_read_cached", |b| {
        b.iter(|| {
            let result = interpreter
                .read_field(&frame, &site, black_box(receiver.clone()))
                .unwrap();
            black_box(result)
        });
    });
}

/// Benchmark: the cost of the active switch without any handler installed.
/// Every send pays one MOP resolution that answers `NoOverride`.
fn bench_send_with_reflection_active(c: &mut Criterion) {
    let universe = Universe::new();
    let interpreter = Interpreter::new(&universe);
    let class = universe.install_class(ClassDescriptor::reflective("R"));
    class.install_method(Method::expression(
        "tag",
        0,
        Expr::literal(Value::symbol("R")),
    ));
    let receiver = Value::Object(universe.new_instance(&class).unwrap());
    let env = Environment::named("idle");
    env.define_handler(
        ReflectiveOp::FieldRead,
        Method::primitive("unrelated", |_, _| Ok(Value::Nil)),
    );
    universe.attach_environment(receiver.as_object().unwrap(), env);
    universe.activate_reflection();

    let driver = send_driver();
    interpreter
        .run_method(&driver, Value::Nil, vec![receiver.clone()])
        .unwrap();

    c.bench_function("send_reflection_active_no_override", |b| {
        b.iter(|| {
            let result = interpreter
                .run_method(&driver, Value::Nil, vec![black_box(receiver.clone())])
                .unwrap();
            black_box(result)
        });
    });
}

criterion_group!(
    benches,
    bench_monomorphic_send,
    bench_polymorphic_send,
    bench_megamorphic_send,
    bench_field_read,
    bench_send_with_reflection_active
);
criterion_main!(benches);
