use http::{Request, Response, StatusCode};

use crate::body::Body;
use crate::conditional::check_lock;
use crate::DavResult;

impl crate::DavHandler {
    pub(crate) async fn handle_mkcol(&self, req: &Request<()>) -> DavResult<Response<Body>> {
        let path = self.path(req)?;
        check_lock(&*self.store, req.headers(), &path, None).await?;

        self.store.mkcol(&path).await?;
        debug!("created collection {path}");

        let mut res = Response::new(Body::empty());
        *res.status_mut() = StatusCode::CREATED;
        Ok(res)
    }
}
