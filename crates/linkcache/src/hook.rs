// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Pre-delete hooks.

use std::future::Future;

use futures::future::BoxFuture;

/// Runs before [`Cache::del`](crate::Cache::del) removes keys locally.
///
/// Hooks typically publish the keys to other nodes so they can drop their own copies. A hook
/// that fails is expected to handle the failure itself; the local delete always proceeds.
///
/// Any `Fn(&[String]) -> impl Future<Output = ()>` closure is a hook, as long as the returned
/// future does not borrow the key slice.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
///
/// use linkcache::Cache;
///
/// let cache = Cache::<String, String>::builder()
///     .pre_delete(|keys: &[String]| {
///         let keys = keys.to_vec();
///         async move {
///             // publish `keys` to the invalidation topic
///             drop(keys);
///         }
///     })
///     .build()?;
/// # Ok::<(), linkcache::BuildError>(())
/// ```
pub trait DeleteHook: Send + Sync {
    /// Called with every key passed to the delete, before anything is removed.
    fn before_delete<'a>(&'a self, keys: &'a [String]) -> BoxFuture<'a, ()>;
}

impl<F, Fut> DeleteHook for F
where
    F: Fn(&[String]) -> Fut + Send + Sync,
    Fut: Future<Output = ()> + Send + 'static,
{
    fn before_delete<'a>(&'a self, keys: &'a [String]) -> BoxFuture<'a, ()> {
        Box::pin(self(keys))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    #[derive(Debug, Default)]
    struct Recorder(Mutex<Vec<Vec<String>>>);

    impl DeleteHook for Recorder {
        fn before_delete<'a>(&'a self, keys: &'a [String]) -> BoxFuture<'a, ()> {
            Box::pin(async move {
                self.0.lock().unwrap().push(keys.to_vec());
            })
        }
    }

    #[tokio::test]
    async fn trait_objects_receive_the_keys() {
        let recorder = Arc::new(Recorder::default());
        let hook: Arc<dyn DeleteHook> = Arc::clone(&recorder) as Arc<dyn DeleteHook>;

        hook.before_delete(&["a".to_string(), "b".to_string()]).await;
        assert_eq!(*recorder.0.lock().unwrap(), vec![vec!["a".to_string(), "b".to_string()]]);
    }

    #[tokio::test]
    async fn closures_are_hooks() {
        let seen = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&seen);
        let hook = move |keys: &[String]| {
            *counter.lock().unwrap() += keys.len();
            async {}
        };

        hook.before_delete(&["a".to_string()]).await;
        hook.before_delete(&["b".to_string(), "c".to_string()]).await;
        assert_eq!(*seen.lock().unwrap(), 3);
    }
}
