use std::sync::mpsc;
use std::thread;

use crate::utils::{Error, Result};

/// A consumer which is fed values one at a time, then finished once to
/// produce its result.
pub trait CallFinish: Send + 'static {
    type CallType;
    type ReturnType;
    fn call(&mut self, f: Self::CallType) -> Result<()>;
    fn finish(&mut self) -> Result<Self::ReturnType>;
}

fn call_all<T: Send + 'static, U: Send + 'static>(
    recv: mpsc::Receiver<T>,
    mut cf: Box<dyn CallFinish<CallType = T, ReturnType = U>>,
) -> Result<U> {
    for m in recv.iter() {
        cf.call(m)?;
    }

    cf.finish()
}

/// Runs a [`CallFinish`] on its own thread, fed through a bounded channel.
pub struct Callback<T, U> {
    send: Option<mpsc::SyncSender<T>>,
    result: Option<thread::JoinHandle<Result<U>>>,
}

impl<T, U> Callback<T, U>
where
    T: Send + 'static,
    U: Send + 'static,
{
    pub fn new(name: &str, cf: Box<dyn CallFinish<CallType = T, ReturnType = U>>) -> Result<Callback<T, U>> {
        let (send, recv) = mpsc::sync_channel(1);

        let result = thread::Builder::new()
            .name(String::from(name))
            .spawn(move || call_all(recv, cf))?;

        Ok(Callback {
            send: Some(send),
            result: Some(result),
        })
    }

    fn join(&mut self) -> Result<U> {
        self.send = None;
        match self.result.take() {
            Some(r) => match r.join() {
                Ok(p) => p,
                Err(e) => Err(Error::WorkerPanic(format!("failed to join {:?}", e))),
            },
            None => Err(Error::InvalidInput(String::from("already called finish"))),
        }
    }
}

impl<T, U> CallFinish for Callback<T, U>
where
    T: Send + 'static,
    U: Send + 'static,
{
    type CallType = T;
    type ReturnType = U;

    fn call(&mut self, t: T) -> Result<()> {
        let failed = match &self.send {
            Some(s) => s.send(t).is_err(),
            None => return Err(Error::InvalidInput(String::from("call after finish"))),
        };
        if failed {
            // the receiving thread has stopped early: report its error
            return match self.join() {
                Err(e) => Err(e),
                Ok(_) => Err(Error::Aborted),
            };
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<U> {
        self.join()
    }
}
