use headers::HeaderMapExt;
use http::{Request, Response, StatusCode};

use crate::body::Body;
use crate::conditional::{check_lock, check_lock_on, check_members, lock_token};
use crate::davheaders::{Destination, Overwrite};
use crate::davpath::DavPath;
use crate::errors::DavError;
use crate::util::DavMethod;
use crate::DavResult;

impl crate::DavHandler {
    // Destination: header as a path below our prefix.
    fn destination(&self, req: &Request<()>, source: &DavPath) -> DavResult<DavPath> {
        let Destination(dest) = req
            .headers()
            .typed_try_get::<Destination>()
            .map_err(|_| DavError::bad_request("Invalid Destination header"))?
            .ok_or_else(|| DavError::bad_request("Missing Destination header"))?;

        let raw = match url::Url::parse(&dest) {
            Ok(url) => url.path().to_string(),
            Err(_) if dest.starts_with('/') => dest,
            Err(_) => return Err(DavError::bad_request("Invalid Destination header")),
        };
        let dest = DavPath::resolve(&raw, &self.prefix)?;

        // some clients send just the base when moving into the root.
        if dest.is_root() && !source.is_root() {
            return Ok(dest.join(source.file_name()));
        }
        Ok(dest)
    }

    pub(crate) async fn handle_copymove(
        &self,
        req: &Request<()>,
        method: DavMethod,
    ) -> DavResult<Response<Body>> {
        let headers = req.headers();
        let source = self.path(req)?;
        let dest = self.destination(req, &source)?;

        if source.as_rel_str() == dest.as_rel_str() {
            return Err(DavError::new(
                StatusCode::FORBIDDEN,
                "Source and destination are the same",
            ));
        }
        if source.is_ancestor_of(&dest) {
            return Err(DavError::new(
                StatusCode::FORBIDDEN,
                "Destination is inside the source collection",
            ));
        }

        let overwrite = headers
            .typed_get::<Overwrite>()
            .map(|Overwrite(o)| o)
            .unwrap_or(false);
        if !overwrite && self.store.exists(&dest).await? {
            return Err(DavError::new(
                StatusCode::PRECONDITION_FAILED,
                "Destination exists and Overwrite is not set",
            ));
        }

        let token = lock_token(headers);
        if method == DavMethod::MOVE {
            check_lock(&*self.store, headers, &source, token.as_deref()).await?;
            check_members(&*self.store, &source, token.as_deref()).await?;
        }
        // an unlocked destination is fine whatever token the request carries.
        if self.store.get_lock(&dest, None).await?.is_some() {
            check_lock_on(&*self.store, &dest, token.as_deref()).await?;
        }
        // an overwritten destination loses its members.
        check_members(&*self.store, &dest, token.as_deref()).await?;

        let created = if method == DavMethod::MOVE {
            let created = self.store.rename(&source, &dest).await?;
            if let Some(token) = token {
                if let Err(e) = self.store.unlock(&source, &token).await {
                    debug!("unlock {token} after move of {source}: {e:?}");
                }
            }
            created
        } else {
            self.store.copy(&source, &dest).await?
        };
        debug!("{method:?} {source} -> {dest} created={created}");

        let mut res = Response::new(Body::empty());
        *res.status_mut() = if created {
            StatusCode::CREATED
        } else {
            StatusCode::NO_CONTENT
        };
        Ok(res)
    }
}
