//! Recursive divide-and-conquer merge sort driven entirely by the job scheduler.
//!
//! A job that, given a slice longer than its cutoff, splits it in half, submits both halves as
//! child jobs, waits on both, and merges the results. This is a client of `jobsystem`, not part
//! of the scheduler itself -- it exercises the recursive fan-out/fan-in scenario end-to-end.

use clap::Parser;
use jobsystem::{Counter, Job, Options, Priority, Scheduler};
use rand::Rng;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
struct Args {
    /// Number of random u32s to sort.
    #[arg(long, default_value_t = 1024)]
    len: usize,

    /// Number of worker threads (including the calling thread).
    #[arg(long)]
    threads: Option<usize>,

    /// Slices of this length or shorter are sorted in-line rather than split further.
    #[arg(long, default_value_t = 32)]
    cutoff: usize,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let mut options = Options::default();
    if let Some(threads) = args.threads {
        options.thread_count = threads;
    }

    let scheduler = Scheduler::new(options).expect("failed to start scheduler");

    let mut rng = rand::thread_rng();
    let mut data: Vec<u32> = (0..args.len).map(|_| rng.gen()).collect();

    merge_sort(&scheduler, &mut data, args.cutoff);

    assert!(data.windows(2).all(|w| w[0] <= w[1]), "output was not sorted");
    println!("sorted {} elements", data.len());

    scheduler.shutdown(true);
}

/// The data a `sort_job` reads: a sub-slice to sort in place, addressed by raw pointer since a
/// `Job`'s data must be a plain `*mut u8`. Lives on the stack frame of the `merge_sort` call that
/// submitted the job, which does not return until `scheduler.wait` below has, so the pointer
/// stays valid for the job's entire execution.
struct SortJob {
    ptr: *mut u32,
    len: usize,
    cutoff: usize,
}

fn sort_job(scheduler: &Scheduler, data: *mut u8) {
    // SAFETY: `data` was produced by `merge_sort` just below from a live `&SortJob` that outlives
    // this call.
    let args = unsafe { &*(data as *const SortJob) };
    // SAFETY: `ptr`/`len` describe a sub-slice `merge_sort` split off via `split_at_mut` and does
    // not touch again until its own `wait` call (which this job's completion unblocks) returns.
    let slice = unsafe { std::slice::from_raw_parts_mut(args.ptr, args.len) };
    merge_sort(scheduler, slice, args.cutoff);
}

fn merge_sort(scheduler: &Scheduler, data: &mut [u32], cutoff: usize) {
    if data.len() <= cutoff {
        data.sort_unstable();
        return;
    }

    let mid = data.len() / 2;
    let (left, right) = data.split_at_mut(mid);

    let left_job = SortJob { ptr: left.as_mut_ptr(), len: left.len(), cutoff };
    let right_job = SortJob { ptr: right.as_mut_ptr(), len: right.len(), cutoff };

    let counter = Counter::new();
    let jobs = vec![
        Job::new(sort_job, &left_job as *const SortJob as *mut u8),
        Job::new(sort_job, &right_job as *const SortJob as *mut u8),
    ];
    scheduler
        .add_jobs(jobs, Some(&counter), Priority::Normal)
        .expect("failed to submit merge-sort jobs");
    scheduler.wait(&counter, 0);

    let mut merged = Vec::with_capacity(data.len());
    merged.extend_from_slice(left);
    let right_start = merged.len();
    merged.extend_from_slice(right);
    merge(&merged[..right_start], &merged[right_start..], data);
}

fn merge(left: &[u32], right: &[u32], out: &mut [u32]) {
    let (mut i, mut j, mut k) = (0, 0, 0);
    while i < left.len() && j < right.len() {
        if left[i] <= right[j] {
            out[k] = left[i];
            i += 1;
        } else {
            out[k] = right[j];
            j += 1;
        }
        k += 1;
    }
    out[k..k + (left.len() - i)].copy_from_slice(&left[i..]);
    k += left.len() - i;
    out[k..k + (right.len() - j)].copy_from_slice(&right[j..]);
}
