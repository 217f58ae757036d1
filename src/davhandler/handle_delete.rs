use http::{Request, Response, StatusCode};

use crate::body::Body;
use crate::conditional::{self, check_lock, check_members, lock_token};
use crate::davheaders::Depth;
use crate::errors::DavError;
use crate::DavResult;

impl crate::DavHandler {
    pub(crate) async fn handle_delete(&self, req: &Request<()>) -> DavResult<Response<Body>> {
        // RFC4918 9.6.1: DELETE on a collection acts as Depth: infinity.
        match conditional::depth(req.headers())? {
            None | Some(Depth::Infinity) => {}
            Some(_) => return Err(DavError::bad_request("DELETE needs Depth: infinity")),
        }

        let path = self.path(req)?;
        let token = lock_token(req.headers());
        check_lock(&*self.store, req.headers(), &path, token.as_deref()).await?;
        check_members(&*self.store, &path, token.as_deref()).await?;

        self.store.delete(&path).await?;
        debug!("deleted {path}");

        // locks do not outlive their resource.
        if let Some(token) = token {
            if let Err(e) = self.store.unlock(&path, &token).await {
                debug!("unlock {token} after delete of {path}: {e:?}");
            }
        }

        let mut res = Response::new(Body::empty());
        *res.status_mut() = StatusCode::NO_CONTENT;
        Ok(res)
    }
}
