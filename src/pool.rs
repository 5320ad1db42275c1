//
// Scoped pooling for backend connections.
//
// A lease hands out an idle connection, or asks the factory for a fresh one
// when the pool is dry. Dropping the lease puts the connection back. Entries
// hold a lease for their own lifetime, so a file handle keeps one connection
// from open to release.
//


use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex};

type Factory<T, E> = dyn Fn() -> Result<T, E> + Send + Sync;

struct Inner<T, E> {
    idle: Mutex<Vec<T>>,
    make: Box<Factory<T, E>>,
}

pub struct Pool<T, E> {
    inner: Arc<Inner<T, E>>,
}

impl<T, E> Clone for Pool<T, E> {
    fn clone(&self) -> Self {
        Pool { inner: Arc::clone(&self.inner) }
    }
}

impl<T: Send, E> Pool<T, E> {
    pub fn new(make: impl Fn() -> Result<T, E> + Send + Sync + 'static) -> Self {
        Pool { inner: Arc::new(Inner { idle: Mutex::new(Vec::new()), make: Box::new(make) }) }
    }

    pub fn lease(&self) -> Result<Lease<T, E>, E> {
        let idle = self.inner.idle.lock().unwrap().pop();
        let item = match idle {
            Some(item) => item,
            None => (self.inner.make)()?,
        };
        Ok(Lease { item: Some(item), pool: Arc::clone(&self.inner) })
    }
}

/// An exclusively owned connection; returns to the pool on drop.
pub struct Lease<T, E> {
    item: Option<T>,
    pool: Arc<Inner<T, E>>,
}

impl<T, E> Deref for Lease<T, E> {
    type Target = T;

    fn deref(&self) -> &T {
        self.item.as_ref().expect("lease already returned")
    }
}

impl<T, E> DerefMut for Lease<T, E> {
    fn deref_mut(&mut self) -> &mut T {
        self.item.as_mut().expect("lease already returned")
    }
}

impl<T, E> Drop for Lease<T, E> {
    fn drop(&mut self) {
        if let Some(item) = self.item.take() {
            self.pool.idle.lock().unwrap().push(item);
        }
    }
}
