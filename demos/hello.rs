//! Reproduces the reference implementation's own demo: allocate a
//! short string, print it, print heap stats, tear down.

use conservative_gc::Collector;

fn make_string(gc: &mut Collector) -> anyhow::Result<*mut u8> {
    let ptr = gc.alloc(14)?;
    // SAFETY: `ptr` was just allocated with 14 live bytes.
    unsafe { std::ptr::copy_nonoverlapping(c"Hello, world!".as_ptr().cast(), ptr, 14) };
    Ok(ptr)
}

fn main() -> anyhow::Result<()> {
    #[cfg(feature = "gc_logging")]
    tracing_subscriber::fmt::init();

    let stack_anchor = 0usize;
    let mut gc = Collector::new(&stack_anchor as *const usize as *const u8);

    let string = make_string(&mut gc)?;
    // SAFETY: `string` holds 14 live, NUL-terminated bytes written above.
    let text = unsafe { std::ffi::CStr::from_ptr(string as *const i8) };
    println!("{} No leaks!", text.to_string_lossy());

    let stats = gc.stats();
    println!("stats = {{");
    println!("    total_heap_size (B): {},", stats.total_heap_size);
    println!("    live_objects: {},", stats.live_objects);
    println!("    live_objects_size (B): {},", stats.live_objects_size);
    println!("}}");

    gc.end();
    Ok(())
}
