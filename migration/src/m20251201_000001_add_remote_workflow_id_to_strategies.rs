use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .alter_table(
                Table::alter()
                    .table(Strategies::Table)
                    .add_column(ColumnDef::new(Strategies::RemoteWorkflowId).string_len(64).null())
                    .to_owned(),
            )
            .await?;

        // Lookups by remote id when the engine reports on a workflow.
        manager
            .create_index(
                Index::create()
                    .name("idx_strategies_remote_workflow_id")
                    .table(Strategies::Table)
                    .col(Strategies::RemoteWorkflowId)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_strategies_remote_workflow_id")
                    .table(Strategies::Table)
                    .to_owned(),
            )
            .await?;

        manager
            .alter_table(
                Table::alter()
                    .table(Strategies::Table)
                    .drop_column(Strategies::RemoteWorkflowId)
                    .to_owned(),
            )
            .await
    }
}

#[derive(DeriveIden)]
enum Strategies {
    Table,
    RemoteWorkflowId,
}
