use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Strategies::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Strategies::Id).big_unsigned().auto_increment().primary_key())
                    .col(ColumnDef::new(Strategies::UserId).big_integer().not_null())
                    .col(ColumnDef::new(Strategies::Name).string_len(255).not_null())
                    .col(ColumnDef::new(Strategies::Description).text().null())
                    .col(ColumnDef::new(Strategies::Frequency).string_len(32).not_null().default("1d"))
                    .col(ColumnDef::new(Strategies::Status).string_len(16).not_null().default("paused"))
                    .col(ColumnDef::new(Strategies::Content).text().null())
                    .col(ColumnDef::new(Strategies::CreatedAt).timestamp().null().default(Expr::cust("CURRENT_TIMESTAMP")))
                    .col(ColumnDef::new(Strategies::UpdatedAt).timestamp().null().default(Expr::cust("CURRENT_TIMESTAMP")))
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_strategies_user_id")
                    .table(Strategies::Table)
                    .col(Strategies::UserId)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Strategies::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Strategies {
    Table,
    Id,
    UserId,
    Name,
    Description,
    Frequency,
    Status,
    Content,
    CreatedAt,
    UpdatedAt,
}
