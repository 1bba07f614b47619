use std::pin::Pin;
use std::task::{Context, Poll};
use bytes::Bytes;
use futures::Stream;
use pin_project_lite::pin_project;
use super::ProgressFn;

pin_project! {
    /// 包装文件读取流，在 reqwest 拉取请求体时上报绝对偏移
    pub struct ProgressStream<S> {
        #[pin]
        inner: S,
        progress: ProgressFn,
        bytes_sent: u64,
    }
}

impl<S> ProgressStream<S> {
    pub fn new(inner: S, progress: ProgressFn, initial_offset: u64) -> Self {
        // 续传时立即上报起始偏移
        if initial_offset > 0 {
            (progress)(initial_offset);
        }

        Self {
            inner,
            progress,
            bytes_sent: initial_offset,
        }
    }
}

impl<S> Stream for ProgressStream<S>
where
    S: Stream<Item = std::io::Result<Bytes>>,
{
    type Item = std::io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.project();

        match this.inner.poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                if !chunk.is_empty() {
                    *this.bytes_sent += chunk.len() as u64;
                    (this.progress)(*this.bytes_sent);
                }
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(None) => {
                // 流结束时补发最终偏移
                (this.progress)(*this.bytes_sent);
                Poll::Ready(None)
            }
            Poll::Ready(Some(Err(e))) => Poll::Ready(Some(Err(e))),
            Poll::Pending => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use futures::StreamExt;

    #[tokio::test]
    async fn reports_running_offsets() {
        let chunks: Vec<std::io::Result<Bytes>> = vec![
            Ok(Bytes::from_static(b"aaaa")),
            Ok(Bytes::from_static(b"bb")),
        ];
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let progress: ProgressFn = Arc::new(move |n| sink.lock().unwrap().push(n));

        let mut stream = ProgressStream::new(futures::stream::iter(chunks), progress, 10);
        while stream.next().await.is_some() {}

        // 初始偏移 + 每块之后 + 结束
        assert_eq!(*seen.lock().unwrap(), vec![10, 14, 16, 16]);
    }
}
