use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use std::task::{Context, Poll, Waker};

/// Señal de despertar para un único consumidor.
///
/// La usa `DynamicBuildStep` para bloquear cuando su provider no entrega
/// pasos: el productor externo llama `notify()` al publicar trabajo nuevo
/// o al declarar el provider agotado.
#[derive(Debug, Default)]
pub struct WakeSignal {
    state: Mutex<SignalState>,
}

#[derive(Debug, Default)]
struct SignalState {
    notified: bool,
    waiter: Option<Waker>,
}

impl WakeSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notify(&self) {
        let mut state = self.state.lock().expect("wake signal poisoned");
        state.notified = true;
        if let Some(waker) = state.waiter.take() {
            waker.wake();
        }
    }

    /// Espera la próxima notificación, consumiéndola.
    pub fn wait(&self) -> WaitFuture<'_> {
        WaitFuture { signal: self }
    }
}

pub struct WaitFuture<'a> {
    signal: &'a WakeSignal,
}

impl Future for WaitFuture<'_> {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let mut state = self.signal.state.lock().expect("wake signal poisoned");
        if state.notified {
            state.notified = false;
            state.waiter = None;
            return Poll::Ready(());
        }
        state.waiter = Some(cx.waker().clone());
        Poll::Pending
    }
}
