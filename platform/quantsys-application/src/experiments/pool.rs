use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc;

pub(crate) type CancelHook<'a> = Option<&'a (dyn Fn() -> bool + Sync)>;

pub(crate) const CANCELLED: &str = "cancelled";

pub(crate) fn is_cancelled(hook: CancelHook<'_>) -> bool {
    hook.is_some_and(|should_cancel| should_cancel())
}

/// Runs `work` over every job on up to `workers` scoped threads.
///
/// Results come back in job order whatever order the workers finish in.
/// `on_done` sees each result as it arrives, on the calling thread. The
/// cancel hook is polled before every job is taken.
pub(crate) fn run_jobs<J, R, W>(
    jobs: &[J],
    workers: usize,
    should_cancel: CancelHook<'_>,
    work: W,
    on_done: &mut dyn FnMut(&R),
) -> Result<Vec<R>, String>
where
    J: Sync,
    R: Send,
    W: Fn(&J) -> R + Sync,
{
    let workers = workers.clamp(1, jobs.len().max(1));
    if workers == 1 {
        let mut results = Vec::with_capacity(jobs.len());
        for job in jobs {
            if is_cancelled(should_cancel) {
                return Err(CANCELLED.to_string());
            }
            let result = work(job);
            on_done(&result);
            results.push(result);
        }
        return Ok(results);
    }

    let cursor = AtomicUsize::new(0);
    let stop = AtomicBool::new(false);
    let (tx, rx) = mpsc::channel::<Option<(usize, R)>>();

    std::thread::scope(|scope| {
        for _ in 0..workers {
            let tx = tx.clone();
            let (cursor, stop, work) = (&cursor, &stop, &work);
            scope.spawn(move || {
                while !stop.load(Ordering::Relaxed) {
                    if is_cancelled(should_cancel) {
                        stop.store(true, Ordering::Relaxed);
                        let _ = tx.send(None);
                        return;
                    }
                    let index = cursor.fetch_add(1, Ordering::Relaxed);
                    let Some(job) = jobs.get(index) else {
                        return;
                    };
                    if tx.send(Some((index, work(job)))).is_err() {
                        return;
                    }
                }
            });
        }
        drop(tx);

        let mut slots: Vec<Option<R>> = (0..jobs.len()).map(|_| None).collect();
        let mut cancelled = false;
        for message in rx {
            match message {
                Some((index, result)) if !cancelled => {
                    on_done(&result);
                    slots[index] = Some(result);
                }
                Some(_) => {}
                None => cancelled = true,
            }
        }
        if cancelled {
            return Err(CANCELLED.to_string());
        }

        slots
            .into_iter()
            .enumerate()
            .map(|(index, slot)| slot.ok_or_else(|| format!("sweep job {index} produced no result")))
            .collect()
    })
}
