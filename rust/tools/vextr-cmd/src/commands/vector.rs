use anyhow::Result;
use vextr::{DmVector, IVector, SmVector, memory};

const PRIMES: [u64; 6] = [2, 3, 5, 7, 11, 13];

pub fn run(count: usize) -> Result<()> {
    let before = memory::thread_stats();
    let mut v = SmVector::<u64, 8>::new();
    let mut inline = v.is_inline();
    for i in 0..count as u64 {
        v.push(i * i)?;
        if inline != v.is_inline() {
            inline = v.is_inline();
            println!("spilled to the heap at length {}", v.len());
        }
    }
    println!(
        "length {}, capacity {}, inline {}",
        v.len(),
        v.capacity(),
        v.is_inline()
    );

    v.shrink_to_fit()?;
    println!("after shrink_to_fit: capacity {}", v.capacity());

    let primes = IVector::from_static(&PRIMES);
    let mut joined = DmVector::new();
    joined.assign_concat(&primes, &v[..v.len().min(4)])?;
    println!("{joined}");

    let stats = memory::thread_stats();
    println!(
        "{} allocations, {} frees",
        stats.allocations - before.allocations,
        stats.frees - before.frees
    );
    Ok(())
}
