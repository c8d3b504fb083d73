//! Run with:
//!   cargo bench --bench vm_benchmark

use std::sync::Arc;

use criterion::{Criterion, black_box, criterion_group, criterion_main};
use tether::{
    FunctionIndex, GcConfig, Instr, Machine, MachineCreateInfo, Reg,
    TranslationUnit, assemble, sys,
};

/// A straight-line unit performing `ops` garnished additions, exercising
/// decode, native dispatch, and allocation per instruction.
fn arithmetic_unit(ops: usize) -> Arc<TranslationUnit> {
    let mut instrs = Vec::with_capacity(ops * 7);
    for i in 0..ops {
        instrs.push(Instr::Int { value: i as i64 });
        instrs.push(Instr::Sys { index: FunctionIndex(sys::NUM_OBJ) });
        instrs.push(Instr::Push { src: Reg::Ret, stack: Reg::Arg });
        instrs.push(Instr::Int { value: 1 });
        instrs.push(Instr::Sys { index: FunctionIndex(sys::NUM_OBJ) });
        instrs.push(Instr::Push { src: Reg::Ret, stack: Reg::Arg });
        instrs.push(Instr::Sys { index: FunctionIndex(sys::NUM_ADD) });
    }
    let mut unit = TranslationUnit::default();
    unit.push(assemble(&instrs));
    Arc::new(unit)
}

fn bench_dispatch(c: &mut Criterion) {
    let mut machine = Machine::new(MachineCreateInfo {
        gc: GcConfig {
            bucket_capacity: 1024,
            collect_threshold: 1 << 16,
        },
    });
    let unit = arithmetic_unit(64);
    c.bench_function("dispatch_arithmetic_64", |b| {
        b.iter(|| {
            let result = machine.execute_unit(unit.clone()).unwrap();
            black_box(result);
        })
    });
}

fn bench_collect(c: &mut Criterion) {
    c.bench_function("allocate_and_collect_1024", |b| {
        b.iter(|| {
            let mut machine = Machine::new(MachineCreateInfo::default());
            for _ in 0..1024 {
                black_box(machine.gc_mut().allocate());
            }
            machine.gc_mut().collect(|_| {});
            black_box(machine.gc().live());
        })
    });
}

criterion_group!(benches, bench_dispatch, bench_collect);
criterion_main!(benches);
